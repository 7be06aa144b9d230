use std::process::Command;
use tempfile::tempdir;

use pngpress::container::glb::GlbContainer;

fn bin() -> String {
    env!("CARGO_BIN_EXE_pngpress").to_string()
}

fn sample_png() -> Vec<u8> {
    let img = image::RgbaImage::from_fn(16, 16, |x, y| {
        image::Rgba([(x * 16) as u8, (y * 16) as u8, 0x40, 0xFF])
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

#[test]
fn cli_run_count_only_reports_summary() {
    let dir = tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir(&corpus).unwrap();
    std::fs::write(corpus.join("a.png"), sample_png()).unwrap();

    let out = Command::new(bin())
        .args(["run", "--count-only"])
        .arg(&corpus)
        .output()
        .unwrap();
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("1 processed"), "stderr: {stderr}");
}

#[test]
fn cli_run_json_summary() {
    let dir = tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir(&corpus).unwrap();
    std::fs::write(corpus.join("a.png"), sample_png()).unwrap();

    let out = Command::new(bin())
        .args(["run", "--count-only", "--json"])
        .arg(&corpus)
        .output()
        .unwrap();
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("\"processed\": 1"), "stderr: {stderr}");
}

#[test]
fn cli_run_dry_run_recompresses_without_touching_disk() {
    let dir = tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir(&corpus).unwrap();
    let png = sample_png();
    std::fs::write(corpus.join("a.png"), &png).unwrap();

    let st = Command::new(bin())
        .args(["run", "--dry-run", "--iterations", "1"])
        .arg(&corpus)
        .status()
        .unwrap();
    assert!(st.success());
    assert_eq!(std::fs::read(corpus.join("a.png")).unwrap(), png);
    assert!(!dir.path().join("corpus.old").exists());
}

#[test]
fn cli_missing_corpus_exits_nonzero() {
    let st = Command::new(bin())
        .args(["run", "/definitely/not/here"])
        .status()
        .unwrap();
    assert!(!st.success());
}

#[test]
fn cli_glb_lists_and_extracts_images() {
    let dir = tempdir().unwrap();
    let png = sample_png();

    let json = format!(
        r#"{{"asset":{{"version":"2.0"}},"bufferViews":[{{"byteOffset":0,"byteLength":{}}}],"images":[{{"bufferView":0,"name":"albedo","mimeType":"image/png"}}]}}"#,
        png.len()
    );
    let container = GlbContainer {
        version: 2,
        json: json.into_bytes(),
        bin: png.clone(),
    };
    let model = dir.path().join("model.vrm");
    std::fs::write(&model, container.encode()).unwrap();

    let extract_dir = dir.path().join("out");
    let out = Command::new(bin())
        .arg("glb")
        .arg(&model)
        .arg("--extract")
        .arg(&extract_dir)
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("albedo"), "stdout: {stdout}");

    let extracted = std::fs::read(extract_dir.join("albedo.png")).unwrap();
    assert_eq!(extracted, png);
}

#[test]
fn cli_glb_rejects_non_container() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bogus.glb");
    std::fs::write(&path, b"nope").unwrap();
    let st = Command::new(bin()).arg("glb").arg(&path).status().unwrap();
    assert!(!st.success());
}

#[test]
fn cli_config_works() {
    let out = Command::new(bin()).arg("config").output().unwrap();
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("EQUALITY_STRATEGY="), "stderr: {stderr}");
}
