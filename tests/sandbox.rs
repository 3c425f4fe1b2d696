//! Sandbox policy and cooperative cancellation, exercised end to end
//! through the embedder API.

use std::time::{Duration, Instant};

use anyhow::Result;
use indoc::indoc;

use pyrite::{
    EvalError, ExecutionContext, Interpreter, SandboxConfig, SandboxPolicy, Value, file_library,
};

fn sandboxed_interpreter(policy: &SandboxPolicy) -> Interpreter {
    let mut interp = Interpreter::new();
    interp.register_library(file_library().instantiate(policy));
    interp
}

#[test]
fn read_inside_the_allowed_root_succeeds() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = dir.path().join("data");
    std::fs::create_dir(&data)?;
    std::fs::write(data.join("file.txt"), "payload")?;

    let policy = SandboxPolicy::Restricted(SandboxConfig::default().allow_path(&data));
    let mut interp = sandboxed_interpreter(&policy);
    interp.set_var("path", data.join("file.txt").display().to_string());

    let value = interp.eval(indoc! {"
        import files
        files.read_file(path)
    "})?;
    assert_eq!(value.to_string(), "payload");
    Ok(())
}

#[test]
fn traversal_escape_is_denied_after_canonicalization() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = dir.path().join("data");
    std::fs::create_dir(&data)?;
    std::fs::write(dir.path().join("secret.txt"), "hidden")?;

    let policy = SandboxPolicy::Restricted(SandboxConfig::default().allow_path(&data));
    let mut interp = sandboxed_interpreter(&policy);
    let escape = data.join("..").join("secret.txt");
    interp.set_var("path", escape.display().to_string());

    let err = interp
        .eval("import files\nfiles.read_file(path)")
        .unwrap_err();
    assert!(err.to_string().contains("PermissionError"));
    Ok(())
}

#[test]
fn permission_error_is_catchable_in_script() -> Result<()> {
    let policy = SandboxPolicy::Restricted(SandboxConfig::default());
    let mut interp = sandboxed_interpreter(&policy);
    let value = interp.eval(indoc! {"
        import files
        try:
            files.read_file('/etc/passwd')
            outcome = 'read'
        except PermissionError as e:
            outcome = 'denied'
        outcome
    "})?;
    assert_eq!(value.to_string(), "denied");
    Ok(())
}

#[test]
fn unrestricted_policy_reads_anywhere_the_host_can() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("open.txt"), "anywhere")?;
    let mut interp = sandboxed_interpreter(&SandboxPolicy::Unrestricted);
    interp.set_var("path", dir.path().join("open.txt").display().to_string());
    let value = interp.eval("import files\nfiles.read_file(path)")?;
    assert_eq!(value.to_string(), "anywhere");
    Ok(())
}

#[test]
fn cancellation_from_another_thread_stops_an_unbounded_loop() {
    let mut interp = Interpreter::new();
    let ctx = ExecutionContext::new();
    let token = ctx.cancel_token();

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
    });

    let started = Instant::now();
    let err = interp
        .eval_with_context(&ctx, "n = 0\nwhile True:\n    n += 1")
        .unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, EvalError::Cancelled { .. }));
    // Bounded margin: well under the multi-second hang this guards against.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn deadline_expiry_behaves_like_cancellation() {
    let mut interp = Interpreter::new();
    let ctx = ExecutionContext::new().with_deadline(Duration::from_millis(30));
    let started = Instant::now();
    let err = interp
        .eval_with_context(&ctx, "while True:\n    pass")
        .unwrap_err();
    assert!(matches!(err, EvalError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cancelled_evaluation_keeps_prior_state_and_output() {
    let mut interp = Interpreter::new();
    interp.capture_output();
    let ctx = ExecutionContext::new().with_deadline(Duration::from_millis(30));
    let err = interp
        .eval_with_context(&ctx, "print('working')\nwhile True:\n    pass")
        .unwrap_err();
    assert!(matches!(err, EvalError::Cancelled { .. }));
    assert_eq!(interp.take_output(), "working\n");
}

#[test]
fn write_file_respects_the_allowed_root() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let policy = SandboxPolicy::Restricted(SandboxConfig::default().allow_path(dir.path()));
    let mut interp = sandboxed_interpreter(&policy);
    interp.set_var("inside", dir.path().join("note.txt").display().to_string());
    interp.set_var("outside", Value::str("/tmp/pyrite-escape.txt"));

    interp.eval("import files\nfiles.write_file(inside, 'kept')")?;
    assert_eq!(std::fs::read_to_string(dir.path().join("note.txt"))?, "kept");

    let err = interp
        .eval("files.write_file(outside, 'leak')")
        .unwrap_err();
    assert!(err.to_string().contains("PermissionError"));
    Ok(())
}
