use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::Value;
use tempfile::tempdir;

use ascii_filter::font_assets::resolve_font_path;

fn run_filter(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ascii-filter"))
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("ascii-filter command should run")
}

fn command_available(name: &str, version_arg: &str) -> bool {
    Command::new(name)
        .arg(version_arg)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|error| {
        panic!(
            "stdout should be json ({error}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn assert_coded_failure(output: &Output, code: &str) {
    assert_eq!(output.status.code(), Some(2), "coded failures exit with 2");
    let envelope = stdout_json(output);
    assert_eq!(envelope["ok"], Value::Bool(false));
    assert_eq!(envelope["error"]["code"], Value::String(code.to_owned()));
}

#[test]
fn unsupported_input_container_is_a_coded_failure() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_filter(dir.path(), &["render", "clip.gif", "out.mp4", "--json"]);
    assert_coded_failure(&output, "UNSUPPORTED_FILE_TYPE");
}

#[test]
fn webm_output_is_refused_before_any_work() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_filter(dir.path(), &["render", "clip.webm", "ascii.webm", "--json"]);
    assert_coded_failure(&output, "UNSUPPORTED_FILE_TYPE");
    let envelope = stdout_json(&output);
    assert_eq!(envelope["error"]["kind"], "usage");
    assert!(!dir.path().join(".ascii.video-staging.webm").exists());
}

#[test]
fn unknown_config_key_is_a_coded_failure() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("filter.yaml"), "colour: false\n").expect("config should write");
    let output = run_filter(
        dir.path(),
        &["render", "in.mp4", "out.mp4", "--config", "filter.yaml", "--json"],
    );
    assert_coded_failure(&output, "INVALID_CONFIG");
}

#[test]
fn missing_font_is_a_coded_failure() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_filter(
        dir.path(),
        &["render", "in.mp4", "out.mp4", "--font", "nope.ttf", "--json"],
    );
    assert_coded_failure(&output, "FONT_LOAD_FAILED");
}

#[test]
fn preset_and_ramp_flags_conflict() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_filter(
        dir.path(),
        &["render", "in.mp4", "out.mp4", "--preset", "blocks", "--ramp", " #"],
    );
    assert!(!output.status.success());
}

#[test]
fn human_errors_go_to_stderr() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_filter(dir.path(), &["probe", "notes.txt"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("UNSUPPORTED_FILE_TYPE"), "stderr: {stderr}");
}

#[test]
fn dry_run_prints_the_resolved_plan() {
    if resolve_font_path(None).is_err() {
        eprintln!("skipping dry run test: no system monospace font");
        return;
    }
    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("filter.yaml"),
        "preset: standard\nblock_width: 6\nblock_height: 12\n",
    )
    .expect("config should write");
    let output = run_filter(
        dir.path(),
        &[
            "render",
            "in.mp4",
            "out.mkv",
            "--config",
            "filter.yaml",
            "--no-color",
            "--max-frames",
            "12",
            "--dry-run",
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "dry run should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let plan = stdout_json(&output);
    assert_eq!(plan["charset"], "standard");
    assert_eq!(plan["ramp"], " .:-=+*#%@");
    assert_eq!(plan["block_width"], 6);
    assert_eq!(plan["block_height"], 12);
    assert_eq!(plan["color"], false);
    assert_eq!(plan["max_frames"], 12);
    assert_eq!(plan["font_size"], 12.0);
    assert!(!dir.path().join("out.mkv").exists());
}

#[test]
fn renders_a_generated_clip_end_to_end() {
    if !command_available("ffmpeg", "-version") || !command_available("ffprobe", "-version") {
        eprintln!("skipping end-to-end test: ffmpeg/ffprobe not available");
        return;
    }
    if resolve_font_path(None).is_err() {
        eprintln!("skipping end-to-end test: no system monospace font");
        return;
    }
    let dir = tempdir().expect("tempdir should create");
    let generated = Command::new("ffmpeg")
        .current_dir(dir.path())
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "lavfi",
            "-i",
            "testsrc=size=64x48:rate=10",
            "-f",
            "lavfi",
            "-i",
            "sine=frequency=440:sample_rate=44100",
            "-t",
            "1",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-shortest",
            "clip.mp4",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !generated {
        eprintln!("skipping end-to-end test: ffmpeg cannot generate an h264 clip");
        return;
    }

    let output = run_filter(
        dir.path(),
        &[
            "render",
            "clip.mp4",
            "ascii.mp4",
            "--max-frames",
            "5",
            "--ffmpeg",
            "system",
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "render should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary = stdout_json(&output);
    assert_eq!(summary["frames_encoded"], 5);
    assert_eq!(summary["stopped_at_frame_limit"], true);
    assert_eq!(summary["stages"][3]["stage"], "encode");
    assert_eq!(summary["stages"][3]["states"].as_array().and_then(|s| s.last()), Some(&Value::from("stopped")));
    assert!(dir.path().join("ascii.mp4").is_file());
    assert!(!dir.path().join(".ascii.video-staging.mp4").exists());

    let probed = run_filter(
        dir.path(),
        &["probe", "ascii.mp4", "--ffmpeg", "system", "--json"],
    );
    assert!(probed.status.success(), "probe should succeed");
    let metadata = stdout_json(&probed);
    assert_eq!(metadata["width"], 64);
    assert_eq!(metadata["height"], 48);
}
