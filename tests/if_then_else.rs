use std::{error::Error, path::Path};

use test_utils::{check_run, Expected};

const SRC_PATH: &str = "./demos/if_then_else.bas";
const EXPECTED: Expected = Expected {
    stdout: "SMALL\nDONE\n",
    stderr: "",
};

#[test]
fn if_then_else_picks_the_false_branch() -> Result<(), Box<dyn Error>> {
    check_run(Path::new(SRC_PATH), EXPECTED)
}
