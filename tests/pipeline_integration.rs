// End-to-end batch pipeline scenarios, driven with stub engines so the
// assertions are about the pipeline, not the entropy coder.

use std::path::Path;

use pngpress::batch::{self, BatchOptions};
use pngpress::engine::{
    EngineError, PassthroughRecompressor, RecompressOptions, Recompressor, ZopfliRecompressor,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A PNG of roughly `width * height * 4` bytes: random noise barely
/// deflates, so the encoded size tracks the raw size.
fn noise_png(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state as u8
    };
    let img = image::RgbaImage::from_fn(width, height, |_, _| {
        image::Rgba([next(), next(), next(), 0xFF])
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

fn write_corpus(root: &Path, files: &[(&str, &[u8])]) {
    for (name, data) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, data).unwrap();
    }
}

struct FailingEngine;

impl Recompressor for FailingEngine {
    fn recompress(&self, _png: &[u8], _opts: &RecompressOptions) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::Status(1))
    }
}

/// Returns a fixed, valid PNG that differs from every input: every item
/// fails verification without failing the engine.
struct WrongImageEngine(Vec<u8>);

impl Recompressor for WrongImageEngine {
    fn recompress(&self, _png: &[u8], _opts: &RecompressOptions) -> Result<Vec<u8>, EngineError> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Directory scenarios
// ---------------------------------------------------------------------------

#[test]
fn stubbed_engine_reports_all_identical_and_zero_reduction() {
    // Three PNGs around 10KB / 50KB / 200KB, engine returns input unchanged.
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("corpus");
    std::fs::create_dir(&root).unwrap();

    let small = noise_png(50, 50, 7);
    let medium = noise_png(112, 112, 11);
    let large = noise_png(224, 224, 13);
    write_corpus(
        &root,
        &[
            ("small.png", &small),
            ("medium.png", &medium),
            ("nested/large.png", &large),
        ],
    );

    let summary = batch::run(&root, &PassthroughRecompressor, &BatchOptions::default()).unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.identical, 3);
    assert_eq!(summary.different(), 0);
    assert_eq!(summary.src_bytes, summary.dst_bytes);
    assert_eq!(summary.reduction_percent(), 0.0);

    // Swap happened: the corpus keeps its name, the backup holds the
    // originals, and the destination is byte-identical to the source.
    assert!(root.is_dir());
    let backup = parent.path().join("corpus.old");
    assert!(backup.is_dir());
    for (name, original) in [
        ("small.png", &small),
        ("medium.png", &medium),
        ("nested/large.png", &large),
    ] {
        assert_eq!(&std::fs::read(root.join(name)).unwrap(), original, "{name}");
        assert_eq!(
            &std::fs::read(backup.join(name)).unwrap(),
            original,
            "{name} (backup)"
        );
    }
}

#[test]
fn engine_errors_are_skip_and_count() {
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("corpus");
    std::fs::create_dir(&root).unwrap();

    let a = noise_png(20, 20, 3);
    let b = noise_png(30, 30, 5);
    write_corpus(&root, &[("a.png", &a), ("b.png", &b)]);

    let summary = batch::run(&root, &FailingEngine, &BatchOptions::default()).unwrap();

    // Every item processed, none identical, batch never aborted.
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.identical, 0);
    assert_eq!(summary.different(), 2);

    // The originals were carried through to the destination unchanged.
    assert_eq!(std::fs::read(root.join("a.png")).unwrap(), a);
    assert_eq!(std::fs::read(root.join("b.png")).unwrap(), b);
}

#[test]
fn verification_mismatch_counts_different_but_completes() {
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("corpus");
    std::fs::create_dir(&root).unwrap();

    let a = noise_png(16, 16, 21);
    let b = noise_png(16, 16, 22);
    write_corpus(&root, &[("a.png", &a), ("b.png", &b)]);

    let wrong = noise_png(16, 16, 99);
    let summary = batch::run(
        &root,
        &WrongImageEngine(wrong.clone()),
        &BatchOptions::default(),
    )
    .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.identical, 0);
    assert_eq!(summary.different(), 2);

    // The engine output still landed in the destination.
    assert_eq!(std::fs::read(root.join("a.png")).unwrap(), wrong);
}

#[test]
fn aggregation_is_order_independent() {
    // More items than workers, fixed parallelism, totals must still add up.
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("corpus");
    std::fs::create_dir(&root).unwrap();

    let mut total = 0u64;
    let mut pngs = Vec::new();
    for i in 0..12u64 {
        let png = noise_png(8 + i as u32, 8, 31 + i);
        total += png.len() as u64;
        pngs.push((format!("img{i:02}.png"), png));
    }
    for (name, data) in &pngs {
        std::fs::write(root.join(name), data).unwrap();
    }

    let opts = BatchOptions {
        jobs: 4,
        dry_run: true,
        ..BatchOptions::default()
    };
    let summary = batch::run(&root, &PassthroughRecompressor, &opts).unwrap();

    assert_eq!(summary.processed, 12);
    assert_eq!(summary.identical, 12);
    assert_eq!(summary.src_bytes, total);
    assert_eq!(summary.dst_bytes, total);
}

// ---------------------------------------------------------------------------
// Archive scenario
// ---------------------------------------------------------------------------

#[test]
fn zip_corpus_is_processed_and_swapped() {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let parent = tempfile::tempdir().unwrap();
    let path = parent.path().join("textures.zip");

    let a = noise_png(24, 24, 41);
    let b = noise_png(32, 16, 43);
    {
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        for (name, data) in [
            ("a.png", a.as_slice()),
            ("skins/b.PNG", b.as_slice()),
            ("manifest.json", b"{}".as_slice()),
        ] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    let summary = batch::run(&path, &PassthroughRecompressor, &BatchOptions::default()).unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.identical, 2);
    assert_eq!(summary.src_bytes, (a.len() + b.len()) as u64);

    assert!(parent.path().join("textures.zip.old").exists());

    let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.png", "manifest.json", "skins/b.PNG"]);

    let mut restored = Vec::new();
    std::io::Read::read_to_end(
        &mut archive.by_name("skins/b.PNG").unwrap(),
        &mut restored,
    )
    .unwrap();
    assert_eq!(restored, b);
}

// ---------------------------------------------------------------------------
// Real engine smoke test
// ---------------------------------------------------------------------------

#[test]
fn real_engine_shrinks_a_directory_losslessly() {
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("corpus");
    std::fs::create_dir(&root).unwrap();

    // Smooth gradients leave the default encoder plenty of slack.
    let img = image::RgbaImage::from_fn(96, 96, |x, y| {
        image::Rgba([(x * 2) as u8, (y * 2) as u8, ((x + y) / 2) as u8, 0xFF])
    });
    let mut gradient = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut gradient),
            image::ImageFormat::Png,
        )
        .unwrap();
    write_corpus(&root, &[("gradient.png", &gradient)]);

    let opts = BatchOptions {
        engine: RecompressOptions {
            iterations: 1,
            iterations_large: 1,
            ..RecompressOptions::default()
        },
        ..BatchOptions::default()
    };
    let summary = batch::run(&root, &ZopfliRecompressor, &opts).unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.identical, 1);
    assert!(summary.dst_bytes <= summary.src_bytes);

    // The swapped-in file must still decode to the same pixels.
    let out = std::fs::read(root.join("gradient.png")).unwrap();
    assert!(pngpress::equality::verify_png(&gradient, &out)
        .unwrap()
        .is_same());
}
