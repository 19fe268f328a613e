use std::{error::Error, path::Path};

use test_utils::{check_run, Expected};

const SRC_PATH: &str = "./demos/hello_loop.bas";
const EXPECTED: Expected = Expected {
    stdout: "0123456789",
    stderr: "",
};

#[test]
fn runs_a_for_next_loop() -> Result<(), Box<dyn Error>> {
    check_run(Path::new(SRC_PATH), EXPECTED)
}
