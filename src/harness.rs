use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};

use crate::interpreter::Interpreter;

fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

#[test]
fn runs_fixture_programs() -> Result<()> {
    let programs_dir = Path::new("tests/programs");
    let mut programs = Vec::new();

    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("py") {
            programs.push(path);
        }
    }

    ensure!(
        !programs.is_empty(),
        "No .py programs found in {}",
        programs_dir.display()
    );
    programs.sort();

    for path in programs {
        let source =
            fs::read_to_string(&path).with_context(|| format!("Reading {}", path.display()))?;
        let mut interpreter = Interpreter::new();
        interpreter.capture_output();
        let result = interpreter.eval(&source);
        let output = interpreter.take_output();

        let expected_error_path = path.with_extension("err");
        if expected_error_path.exists() {
            let expected_error = fs::read_to_string(&expected_error_path)
                .with_context(|| format!("Reading {}", expected_error_path.display()))?;
            let expected_error = expected_error.trim();
            let error = result
                .err()
                .with_context(|| format!("Expected an error for {}", path.display()))?
                .to_string();
            ensure!(
                error.contains(expected_error),
                "Expected error containing '{expected_error}', got '{error}' for {}",
                path.display()
            );
            continue;
        }

        result.with_context(|| format!("Evaluating {}", path.display()))?;
        let expected_path = path.with_extension("out");
        let expected = fs::read_to_string(&expected_path)
            .with_context(|| format!("Reading {}", expected_path.display()))?;
        assert_eq!(
            normalize_output(&output),
            normalize_output(&expected),
            "Output mismatch for {}",
            path.display()
        );
    }

    Ok(())
}
