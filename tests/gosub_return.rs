use std::{error::Error, path::Path};

use test_utils::{check_run, Expected};

const SRC_PATH: &str = "./demos/gosub_return.bas";
const EXPECTED: Expected = Expected {
    stdout: "IN SUB\nDONE\n",
    stderr: "",
};

#[test]
fn gosub_returns_to_the_statement_after_the_call() -> Result<(), Box<dyn Error>> {
    check_run(Path::new(SRC_PATH), EXPECTED)
}
