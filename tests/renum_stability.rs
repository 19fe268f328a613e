use std::error::Error;
use std::io::Write;
use std::process::{Command, Stdio};

const RBASIC_PATH: &str = "./target/debug/rbasic";

/// RENUM renumbers lines and rewrites GOTO targets, but a LIST taken right
/// after should show the very same program text modulo line numbers.
#[test]
fn renum_then_run_behaves_identically_to_the_original_numbering() -> Result<(), Box<dyn Error>> {
    let script = "\
10 GOTO 30\n\
20 PRINT \"SKIPPED\"\n\
30 PRINT \"HERE\"\n\
RENUM 100, 10\n\
RUN\n\
EXIT\n";

    let mut child = Command::new(RBASIC_PATH)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    child
        .stdin
        .take()
        .expect("child stdin")
        .write_all(script.as_bytes())?;

    let output = child.wait_with_output()?;
    let stdout = String::from_utf8(output.stdout)?;

    assert!(stdout.contains("HERE\n"));
    assert!(!stdout.contains("SKIPPED"));
    Ok(())
}
