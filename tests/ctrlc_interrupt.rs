use std::error::Error;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::Duration;

const RBASIC_PATH: &str = "./target/debug/rbasic";

/// A Ctrl-C during RUN should abort the RUN cleanly and print "Program
/// terminated" rather than letting the default SIGINT behavior kill the
/// process outright.
#[test]
fn sigint_aborts_a_running_program_cleanly() -> Result<(), Box<dyn Error>> {
    let child = Command::new(RBASIC_PATH)
        .arg("./demos/infinite_loop.bas")
        .arg("--run")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    sleep(Duration::from_millis(300));

    let pid = child.id();
    Command::new("kill").arg("-INT").arg(pid.to_string()).status()?;

    let output = child.wait_with_output()?;
    let stderr = String::from_utf8(output.stderr)?;

    assert!(stderr.contains("Program terminated"));
    assert_eq!(output.status.code(), Some(0));
    Ok(())
}
