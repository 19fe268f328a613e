use std::{
    error::Error,
    io,
    path::Path,
    process::{Command, Output},
    str,
};

const RBASIC_PATH: &str = "./target/debug/rbasic";

pub struct Expected<'a> {
    pub stdout: &'a str,
    pub stderr: &'a str,
}

impl<'a> Expected<'a> {
    fn assert_matches(self, output: &Output) -> Result<(), Box<dyn Error>> {
        assert_eq!(str::from_utf8(&output.stdout)?, self.stdout);
        assert_eq!(str::from_utf8(&output.stderr)?, self.stderr);
        Ok(())
    }
}

fn run_program(src_path: &Path) -> Result<Output, io::Error> {
    Command::new(RBASIC_PATH).arg("--run").arg(src_path).output()
}

pub fn check_run(src_path: &Path, expected: Expected) -> Result<(), Box<dyn Error>> {
    let output = run_program(src_path)?;

    expected.assert_matches(&output)?;
    assert!(
        output.status.success(),
        "rbasic exited with status {:?}",
        output.status.code()
    );

    Ok(())
}

pub fn check_failing_run(src_path: &Path) -> Result<(), Box<dyn Error>> {
    let output = run_program(src_path)?;

    println!("{output:?}");
    assert!(
        !output.status.success(),
        "rbasic should have exited with a non-zero status"
    );

    Ok(())
}
