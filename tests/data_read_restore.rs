use std::{error::Error, path::Path};

use test_utils::{check_run, Expected};

const SRC_PATH: &str = "./demos/data_read_restore.bas";
const EXPECTED: Expected = Expected {
    stdout: "121\n",
    stderr: "",
};

#[test]
fn restore_rewinds_the_data_cursor() -> Result<(), Box<dyn Error>> {
    check_run(Path::new(SRC_PATH), EXPECTED)
}
