use std::{error::Error, path::Path};

use test_utils::{check_run, Expected};

const SRC_PATH: &str = "./demos/on_gosub.bas";
const EXPECTED: Expected = Expected {
    stdout: "TWO\nAFTER\n",
    stderr: "",
};

#[test]
fn on_gosub_dispatches_to_the_kth_target() -> Result<(), Box<dyn Error>> {
    check_run(Path::new(SRC_PATH), EXPECTED)
}
