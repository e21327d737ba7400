use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use layersplit::io::{EntrySource, LocalFileReader};
use layersplit::sink::{ArchiveSink, UnitWriter, ZipSink};
use layersplit::zip::{ZipFileEntry, ZipReader};
use layersplit::{
    pack, run, run_with_config, FileCatalog, OutputUnit, PackError, PackOptions,
    PartMaterializer,
};

fn write_file(root: &Path, relative: &str, data: &[u8]) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, data).unwrap();
    path
}

fn bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

async fn zip_entries(path: &Path) -> Vec<(ZipFileEntry, Vec<u8>)> {
    let reader = ZipReader::new(Arc::new(LocalFileReader::new(path).unwrap()));
    let mut out = Vec::new();
    for entry in reader.list_entries().await.unwrap() {
        let data = reader.read_entry(&entry).await.unwrap();
        out.push((entry, data));
    }
    out
}

#[tokio::test]
async fn test_three_files_two_parts() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_file(src.path(), "a.txt", &bytes(10, 1));
    write_file(src.path(), "b.txt", &bytes(20, 2));
    write_file(src.path(), "c.txt", &bytes(25, 3));

    let report = run(PackOptions::new(src.path(), out.path()).max_part_size(30))
        .await
        .unwrap();

    assert_eq!(report.files_found, 3);
    assert_eq!(report.bins, 2);
    assert!(!report.has_failures());
    let names: Vec<_> = report.units.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["python_part_1", "python_part_2"]);
    assert_eq!(report.units[0].bytes, 30);
    assert!(report.units.iter().all(|u| u.complete && u.artifacts.len() == 2));

    assert_eq!(fs::read(out.path().join("python1/a.txt")).unwrap(), bytes(10, 1));
    assert_eq!(fs::read(out.path().join("python1/b.txt")).unwrap(), bytes(20, 2));
    assert_eq!(fs::read(out.path().join("python2/c.txt")).unwrap(), bytes(25, 3));
    assert!(!out.path().join("python2/a.txt").exists());

    let first = zip_entries(&out.path().join("python_part_1.zip")).await;
    let first: Vec<_> = first.iter().map(|(e, d)| (e.file_name.as_str(), d.clone())).collect();
    assert_eq!(
        first,
        [("python1/a.txt", bytes(10, 1)), ("python1/b.txt", bytes(20, 2))]
    );
    let second = zip_entries(&out.path().join("python_part_2.zip")).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].0.file_name, "python2/c.txt");
}

#[tokio::test]
async fn test_oversized_file_is_split() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let original = bytes(120, 9);
    write_file(src.path(), "lib/big.bin", &original);

    let report = run(PackOptions::new(src.path(), out.path())
        .max_part_size(50)
        .buffer_size(16))
    .await
    .unwrap();

    assert_eq!(report.bins, 1);
    let parts: Vec<_> = report.units.iter().map(|u| (u.name.as_str(), u.part, u.bytes)).collect();
    assert_eq!(
        parts,
        [
            ("lib/big.bin.part1", Some(1), 50),
            ("lib/big.bin.part2", Some(2), 50),
            ("lib/big.bin.part3", Some(3), 20),
        ]
    );

    let mut joined = Vec::new();
    for k in 1..=3 {
        let plain = fs::read(out.path().join(format!("python1/lib/big.bin.part{k}"))).unwrap();
        let archive = zip_entries(&out.path().join(format!("lib/big.bin.part{k}.zip"))).await;
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].0.file_name, format!("python1/lib/big.bin.part{k}"));
        assert_eq!(archive[0].1, plain);
        joined.extend(plain);
    }
    assert_eq!(joined, original);
    assert!(!out.path().join("python1/lib/big.bin").exists());
}

#[tokio::test]
async fn test_split_parts_can_stay_unwrapped() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_file(src.path(), "big.bin", &bytes(120, 4));
    write_file(src.path(), "small.txt", &bytes(5, 4));

    let mut options = PackOptions::new(src.path(), out.path()).max_part_size(50);
    options.wrap_split_parts = false;
    let report = run(options).await.unwrap();

    assert!(!report.has_failures());
    assert!(out.path().join("python1/big.bin.part3").exists());
    assert!(!out.path().join("big.bin.part1.zip").exists());
    assert!(out.path().join("python_part_2.zip").exists());
}

#[tokio::test]
async fn test_empty_source_writes_nothing() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let target = out.path().join("python");

    let report = run(PackOptions::new(src.path(), &target)).await.unwrap();

    assert_eq!(report.files_found, 0);
    assert_eq!(report.bins, 0);
    assert!(report.units.is_empty());
    assert!(!target.exists());
}

#[tokio::test]
async fn test_zero_capacity_fails_before_io() {
    // The source does not exist either; the capacity error must win.
    let missing = PathBuf::from("/definitely/not/here");
    let err = run(PackOptions::new(&missing, "/also/not/here").max_part_size(0))
        .await
        .unwrap_err();
    assert!(matches!(err, PackError::InvalidCapacity(0)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_source_preconditions() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let err = run(PackOptions::new(dir.path().join("missing"), &out))
        .await
        .unwrap_err();
    assert!(matches!(err, PackError::SourceNotFound(_)));

    let file = write_file(dir.path(), "file.txt", b"x");
    let err = run(PackOptions::new(&file, &out)).await.unwrap_err();
    assert!(matches!(err, PackError::SourceNotADirectory(_)));
    assert!(!out.exists());
}

#[tokio::test]
async fn test_every_file_lands_exactly_once() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let mut expected = BTreeSet::new();
    for i in 0..40usize {
        let relative = format!("pkg{}/mod{}/file{i}.py", i % 3, i % 5);
        write_file(src.path(), &relative, &bytes((i * 37) % 250, i as u8));
        expected.insert(relative);
    }
    write_file(src.path(), "pkg0/huge.so", &bytes(1000, 7));

    let mut options = PackOptions::new(src.path(), out.path()).max_part_size(256);
    options.verify = true;
    options.jobs = 4;
    let report = run(options).await.unwrap();
    assert!(!report.has_failures(), "{report}");

    let bins: Vec<_> = report.units.iter().map(|u| u.bin).collect();
    let mut sorted = bins.clone();
    sorted.sort();
    assert_eq!(bins, sorted);

    let mut seen = BTreeSet::new();
    let mut huge = Vec::new();
    for unit in &report.units {
        let archive = unit
            .artifacts
            .iter()
            .find(|p| p.extension().is_some_and(|e| e == "zip"))
            .unwrap();
        for (entry, data) in zip_entries(archive).await {
            let (folder, relative) = entry.file_name.split_once('/').unwrap();
            assert_eq!(folder, format!("python{}", unit.bin));
            if let Some(part) = relative.strip_prefix("pkg0/huge.so.part") {
                assert_eq!(part.parse::<usize>().unwrap(), unit.part.unwrap());
                huge.extend(data);
                continue;
            }
            assert!(data.len() <= 256);
            assert!(seen.insert(relative.to_string()), "{relative} packed twice");
        }
    }
    assert_eq!(seen, expected);
    assert_eq!(huge, bytes(1000, 7));
}

#[tokio::test]
async fn test_modification_time_is_preserved() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let path = write_file(src.path(), "dated.txt", b"old content");
    let mtime = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();

    run(PackOptions::new(src.path(), out.path())).await.unwrap();

    let copied = fs::metadata(out.path().join("python1/dated.txt")).unwrap();
    assert_eq!(copied.modified().unwrap(), mtime);
    let entries = zip_entries(&out.path().join("python_part_1.zip")).await;
    assert_eq!(entries[0].0.modified_time(), Some(mtime));
}

#[tokio::test]
async fn test_rerun_overwrites_and_skips_own_output() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "a.txt", &bytes(10, 1));
    write_file(src.path(), "b.txt", &bytes(10, 2));
    let target = src.path().join("dist");

    let first = run(PackOptions::new(src.path(), &target).max_part_size(15))
        .await
        .unwrap();
    let second = run(PackOptions::new(src.path(), &target).max_part_size(15))
        .await
        .unwrap();

    assert_eq!(first.files_found, 2);
    assert_eq!(second.files_found, 2);
    assert_eq!(first.units, second.units);
    assert!(!second.has_failures());
    assert_eq!(fs::read(target.join("python2/b.txt")).unwrap(), bytes(10, 2));
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let target = out.path().join("python");
    write_file(src.path(), "a.txt", &bytes(10, 1));
    write_file(src.path(), "big.bin", &bytes(100, 1));

    let mut options = PackOptions::new(src.path(), &target).max_part_size(40);
    options.dry_run = true;
    let report = run(options).await.unwrap();

    assert!(report.dry_run);
    let names: Vec<_> = report.units.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["python_part_1", "big.bin.part1", "big.bin.part2", "big.bin.part3"]);
    assert!(report.artifacts().next().is_none());
    assert!(!target.exists());
}

#[tokio::test]
async fn test_shrunk_file_is_skipped_and_rest_written() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_file(src.path(), "a.txt", &bytes(10, 1));
    write_file(src.path(), "b.txt", &bytes(20, 2));

    let config = Arc::new(
        PackOptions::new(src.path(), out.path())
            .max_part_size(30)
            .build()
            .unwrap(),
    );
    let files: Vec<_> = FileCatalog::open(src.path(), None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let bins = pack(files, config.max_part_size).unwrap();
    assert_eq!(bins.len(), 1);

    // b.txt loses bytes between cataloguing and copying.
    write_file(src.path(), "b.txt", b"short");

    let materializer = PartMaterializer::new(config).unwrap();
    let outcome = materializer.materialize(&bins[0]).await;

    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(
        outcome.failures[0].error,
        PackError::Io { offset: Some(5), .. }
    ));
    assert_eq!(outcome.units.len(), 1);
    assert!(!outcome.units[0].complete);
    assert_eq!(outcome.units[0].entries, 1);

    assert!(out.path().join("python1/a.txt").exists());
    assert!(!out.path().join("python1/b.txt").exists());
    let entries = zip_entries(&out.path().join("python_part_1.zip")).await;
    let names: Vec<_> = entries.iter().map(|(e, _)| e.file_name.as_str()).collect();
    assert_eq!(names, ["python1/a.txt"]);
}

#[tokio::test]
async fn test_failed_split_part_stops_the_split() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_file(src.path(), "big.bin", &bytes(120, 5));

    let config = Arc::new(
        PackOptions::new(src.path(), out.path())
            .max_part_size(50)
            .buffer_size(16)
            .build()
            .unwrap(),
    );
    let files: Vec<_> = FileCatalog::open(src.path(), None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let bins = pack(files, config.max_part_size).unwrap();

    // The file loses its tail after cataloguing: part 2 ends early, part 3 is gone.
    write_file(src.path(), "big.bin", &bytes(70, 5));

    let outcome = PartMaterializer::new(config)
        .unwrap()
        .materialize(&bins[0])
        .await;

    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(
        outcome.failures[0].error,
        PackError::Io { offset: Some(70), .. }
    ));
    let units: Vec<_> = outcome
        .units
        .iter()
        .map(|u| (u.name.as_str(), u.complete))
        .collect();
    assert_eq!(units, [("big.bin.part1", true), ("big.bin.part2", false)]);

    let plain = |k: usize| out.path().join(format!("python1/big.bin.part{k}"));
    let zipped = |k: usize| out.path().join(format!("big.bin.part{k}.zip"));
    assert_eq!(fs::read(plain(1)).unwrap(), bytes(50, 5));
    assert_eq!(zip_entries(&zipped(1)).await[0].1, bytes(50, 5));
    for k in [2, 3] {
        assert!(!plain(k).exists(), "part{k} left behind");
        assert!(!zipped(k).exists(), "part{k}.zip left behind");
    }
}

/// Sink whose writes always fail, for the first bin only.
struct FullDiskSink;

struct FullDiskWriter {
    unit: String,
}

#[async_trait]
impl ArchiveSink for FullDiskSink {
    fn kind(&self) -> &'static str {
        "full-disk"
    }

    fn accepts(&self, unit: &OutputUnit) -> bool {
        unit.bin == 1
    }

    async fn open(&self, unit: &OutputUnit) -> layersplit::error::Result<Box<dyn UnitWriter>> {
        Ok(Box::new(FullDiskWriter {
            unit: unit.name.clone(),
        }))
    }
}

#[async_trait]
impl UnitWriter for FullDiskWriter {
    async fn write_entry(
        &mut self,
        _entry_name: &str,
        _source: &mut dyn EntrySource,
        _modified: SystemTime,
        _mode: Option<u32>,
    ) -> layersplit::error::Result<u64> {
        Err(PackError::archive_write(
            &self.unit,
            std::io::Error::other("no space left on device"),
        ))
    }

    async fn close(self: Box<Self>) -> layersplit::error::Result<PathBuf> {
        panic!("a failed unit must not be closed");
    }

    async fn abandon(self: Box<Self>) {}
}

#[tokio::test]
async fn test_sink_failure_marks_unit_and_continues() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_file(src.path(), "a.txt", &bytes(10, 1));
    write_file(src.path(), "b.txt", &bytes(20, 2));
    write_file(src.path(), "c.txt", &bytes(25, 3));

    let config = Arc::new(
        PackOptions::new(src.path(), out.path())
            .max_part_size(30)
            .build()
            .unwrap(),
    );
    let sinks: Vec<Arc<dyn ArchiveSink>> =
        vec![Arc::new(FullDiskSink), Arc::new(ZipSink::new(&config))];
    let materializer = PartMaterializer::with_sinks(config.clone(), sinks).unwrap();
    let files: Vec<_> = FileCatalog::open(src.path(), None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let bins = pack(files, config.max_part_size).unwrap();
    assert_eq!(bins.len(), 2);

    let first = materializer.materialize(&bins[0]).await;
    assert_eq!(first.failures.len(), 1);
    assert!(matches!(
        &first.failures[0].error,
        PackError::ArchiveWrite { unit, .. } if unit == "python_part_1"
    ));
    assert!(!first.failures[0].error.is_fatal());
    let unit = &first.units[0];
    assert!(!unit.complete);
    assert_eq!(unit.entries, 2);
    assert_eq!(unit.artifacts, [out.path().join("python_part_1.zip")]);
    let names: Vec<_> = zip_entries(&unit.artifacts[0])
        .await
        .into_iter()
        .map(|(e, _)| e.file_name)
        .collect();
    assert_eq!(names, ["python1/a.txt", "python1/b.txt"]);

    let second = materializer.materialize(&bins[1]).await;
    assert!(second.failures.is_empty());
    assert!(second.units[0].complete);
    assert!(out.path().join("python_part_2.zip").exists());
}

#[tokio::test]
async fn test_modified_config_still_checks_capacity_first() {
    let mut config = PackOptions::new("/definitely/not/here", "/also/not/here")
        .build()
        .unwrap();
    config.max_part_size = 0;

    let err = run_with_config(Arc::new(config)).await.unwrap_err();
    assert!(matches!(err, PackError::InvalidCapacity(0)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_non_utf8_names_are_skipped_not_merged() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fs::write(src.path().join(OsStr::from_bytes(b"a\xff")), b"first").unwrap();
    fs::write(src.path().join(OsStr::from_bytes(b"a\xfe")), b"second").unwrap();
    write_file(src.path(), "b.txt", b"kept");

    let mut options = PackOptions::new(src.path(), out.path()).max_part_size(1000);
    options.write_archives = false;
    let report = run(options).await.unwrap();

    assert_eq!(report.files_found, 1);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.unit.is_none()
        && matches!(f.error, PackError::Io { .. })));
    let copied: Vec<_> = fs::read_dir(out.path().join("python1"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(copied, [std::ffi::OsString::from("b.txt")]);
}
