// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, io::Write};

use anyhow::{Context, Result};
use iscsi_initiator_rs::cfg::logger::{LogOutput, LoggerConfig, init_logger};
use serde_json::Value;
use serial_test::serial;
use tempfile::{NamedTempFile, tempdir};

fn write_yaml(body: &str) -> Result<NamedTempFile> {
    let mut f = NamedTempFile::new()?;
    f.write_all(body.as_bytes())?;
    f.flush()?;
    Ok(f)
}

#[test]
fn file_output_needs_file_section() -> Result<()> {
    let f = write_yaml("logger:\n  level: info\n  output: file\n")?;
    assert!(LoggerConfig::load_from_file(f.path()).is_err());

    let f = write_yaml("logger:\n  level: debug\n  output: stderr\n  is_show_line: true\n")?;
    let cfg = LoggerConfig::load_from_file(f.path())?;
    assert_eq!(cfg.logger.output, LogOutput::Stderr);
    assert!(cfg.logger.is_show_line);
    assert!(!cfg.logger.is_show_target);
    Ok(())
}

#[test]
#[serial]
fn json_lines_to_file() -> Result<()> {
    let dir = tempdir()?;
    let log_path = dir.path().join("initiator.log");
    let cfg = write_yaml(&format!(
        "logger:\n  level: info\n  output: file\n  is_show_target: true\n  file:\n    path: \"{}\"\n",
        log_path.display()
    ))?;

    let guard = init_logger(cfg.path())?;
    {
        let span = tracing::info_span!("session", portal = "192.0.2.1:3260");
        let _entered = span.enter();
        tracing::info!(itt = 7u64, "json logger smoke line");
    }
    tracing::debug!("filtered out by level");
    drop(guard);

    // a subscriber is already installed
    assert!(init_logger(cfg.path()).is_err());

    let text = fs::read_to_string(&log_path)?;
    let line = text
        .lines()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .find(|v| v["fields"]["message"] == "json logger smoke line")
        .context("logged line not found")?;
    assert_eq!(line["level"], "INFO");
    assert_eq!(line["fields"]["itt"], 7);
    assert_eq!(line["fields"]["portal"], "192.0.2.1:3260");
    assert_eq!(line["fields"]["span_names"][0], "session");
    assert!(line["target"].is_string());
    assert!(line.get("line").is_none());
    assert!(!text.contains("filtered out by level"));
    Ok(())
}
