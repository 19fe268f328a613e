use std::{error::Error, path::Path};

use test_utils::{check_run, Expected};

const SRC_PATH: &str = "./demos/nested_for_next.bas";
const EXPECTED: Expected = Expected {
    stdout: "11\n12\n21\n22\n",
    stderr: "",
};

#[test]
fn nested_loops_iterate_the_inner_loop_fully_per_outer_tick() -> Result<(), Box<dyn Error>> {
    check_run(Path::new(SRC_PATH), EXPECTED)
}
