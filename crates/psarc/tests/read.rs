use std::io::Cursor;

use binrw::BinWrite;
use flate2::Compression;
use psarc::{
    block::BlockStream,
    error::{Error, FileNotFoundError, FormatError, Result},
    hash::name_hash,
    types::{PsarcHeader, TocEntry, TocRecord},
    CompressionMethod, EntrySource, PsarcArchive,
};
use tracing::info;
use tracing_test::traced_test;

fn sample(len: usize) -> Vec<u8> {
    (0..len as u32).map(|i| (i * 7 % 251) as u8).collect()
}

/// Lay out an archive holding `name` as one zlib block, the manifest stored raw
fn single_block_archive(name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let compressed = CompressionMethod::Zlib.compress(data, Compression::default())?;

    let header = PsarcHeader {
        toc_length: 32 + 2 * 30 + 2 * 2,
        file_count: 2,
        ..Default::default()
    };
    let manifest = TocRecord::try_from(&TocEntry {
        uncompressed_size: name.len() as u64,
        data_offset: 96,
        ..Default::default()
    })?;
    let file = TocRecord::try_from(&TocEntry {
        name_hash: name_hash(name),
        zsize_index: 1,
        uncompressed_size: data.len() as u64,
        data_offset: 96 + name.len() as u64,
    })?;

    let mut out = Cursor::new(Vec::new());
    header.write(&mut out)?;
    manifest.write(&mut out)?;
    file.write(&mut out)?;

    let mut out = out.into_inner();
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(compressed.len() as u16).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

#[traced_test]
#[test]
fn extract_single_compressed_block() -> Result<()> {
    let data = sample(3271);
    let archive = PsarcArchive::new(single_block_archive("a.txt", &data)?)?;

    assert_eq!(archive.header().block_size, 65536);
    assert_eq!(archive.header().file_count, 2);
    assert_eq!(archive.zsizes().len(), 2);
    assert_ne!(archive.zsizes().get(1), Some(0));

    let file = archive.by_name("a.txt")?;
    assert!(file.hash_matches());
    assert_eq!(file.block_count(), 1);

    let extracted = archive.extract("a.txt")?;
    info!("extracted {} bytes", extracted.len());
    assert_eq!(extracted.len(), 3271);
    assert_eq!(extracted, data);

    Ok(())
}

#[test]
fn block_accounting() -> Result<()> {
    let block_size = 64;
    let data = sample(2 * block_size + 1);
    let bytes = psarc::build([("blocks.bin", &data)], block_size as u32, true)?;
    let archive = PsarcArchive::new(bytes.as_slice())?;

    let file = archive.by_name("blocks.bin")?;
    assert_eq!(file.block_count(), 3);

    let stream = BlockStream::new(
        &bytes,
        archive.zsizes(),
        block_size as u32,
        CompressionMethod::Zlib,
    );
    let expected = stream
        .spans(file.meta())
        .map(|span| span.map(|span| span.expected))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(expected, vec![64, 64, 1]);

    let blocks = stream
        .spans(file.meta())
        .map(|span| stream.decode_block(&span?).map(|block| block.into_owned()))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(blocks.concat(), data);
    assert_eq!(file.read_to_vec()?, data);

    Ok(())
}

#[test]
fn lookup_ignoring_case() -> Result<()> {
    let archive = PsarcArchive::new(psarc::build([("Foo.PNG", b"png")], 65536, true)?)?;

    assert_eq!(archive.extract("Foo.PNG")?, b"png");
    assert_eq!(archive.extract("foo.png")?, b"png");
    assert_eq!(archive.index_for_name("FOO.png"), archive.index_for_name("foo.PNG"));
    assert_eq!(archive.file_names().collect::<Vec<_>>(), vec!["Foo.PNG"]);

    Ok(())
}

#[test]
fn lookup_case_sensitive() -> Result<()> {
    let archive = PsarcArchive::new(psarc::build([("Foo.PNG", b"png")], 65536, false)?)?;

    assert_eq!(archive.extract("Foo.PNG")?, b"png");
    assert!(matches!(
        archive.extract("foo.png"),
        Err(Error::FileNotFound(FileNotFoundError::Name(name))) if name == "foo.png"
    ));

    let archive = PsarcArchive::new(psarc::build(
        [("Foo.PNG", b"upper"), ("foo.png", b"lower")],
        65536,
        false,
    )?)?;
    assert_eq!(archive.extract("Foo.PNG")?, b"upper");
    assert_eq!(archive.extract("foo.png")?, b"lower");

    Ok(())
}

#[test]
fn manifest_not_first() -> Result<()> {
    let mut bytes = psarc::build([("a.txt", b"a")], 65536, true)?;
    bytes[32] = 0x01;

    assert!(matches!(
        PsarcArchive::new(bytes),
        Err(Error::Format(FormatError::MissingOrDuplicateManifest { found: 0 }))
    ));

    Ok(())
}

#[test]
fn manifest_twice() -> Result<()> {
    let mut bytes = psarc::build([("a.txt", b"a")], 65536, true)?;
    bytes[62..78].fill(0);

    assert!(matches!(
        PsarcArchive::new(bytes),
        Err(Error::Format(FormatError::MissingOrDuplicateManifest { found: 2 }))
    ));

    Ok(())
}

#[test]
fn toc_length_not_whole() -> Result<()> {
    let mut bytes = psarc::build([("a.txt", b"a")], 65536, true)?;
    let toc_length = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    bytes[12..16].copy_from_slice(&(toc_length + 1).to_be_bytes());

    assert!(matches!(
        PsarcArchive::new(bytes),
        Err(Error::Format(FormatError::InconsistentTocLength { file_count: 2, .. }))
    ));

    Ok(())
}

#[test]
fn unsupported_header_fields() -> Result<()> {
    let bytes = psarc::build([("a.txt", b"a")], 65536, true)?;

    let mut major = bytes.clone();
    major[5] = 2;
    assert!(matches!(
        PsarcArchive::new(major),
        Err(Error::Format(FormatError::UnsupportedVersion { major: 2, minor: 4 }))
    ));

    let mut codec = bytes.clone();
    codec[8..12].copy_from_slice(b"lzma");
    assert!(matches!(
        PsarcArchive::new(codec),
        Err(Error::Format(FormatError::UnsupportedCompression(tag))) if &tag == b"lzma"
    ));

    let mut entry_size = bytes;
    entry_size[19] = 32;
    assert!(matches!(
        PsarcArchive::new(entry_size),
        Err(Error::Format(FormatError::UnsupportedTocEntrySize(32)))
    ));

    Ok(())
}

#[test]
fn truncated_toc() -> Result<()> {
    let bytes = psarc::build([("a.txt", b"a")], 65536, true)?;

    assert!(matches!(
        PsarcArchive::new(&bytes[..70]),
        Err(Error::Format(FormatError::TruncatedToc { offset: 32, .. }))
    ));

    Ok(())
}

#[test]
fn truncated_last_block() -> Result<()> {
    let data = sample(3 * 512 + 100);
    let mut bytes = psarc::build([("data.bin", &data)], 512, true)?;
    bytes.pop();

    // Truncation only affects the data, so the archive still opens
    let archive = PsarcArchive::new(bytes)?;
    assert!(matches!(
        archive.extract("data.bin"),
        Err(Error::Format(FormatError::TruncatedData { .. }))
    ));

    Ok(())
}

#[test]
fn concurrent_extraction() -> Result<()> {
    let files = (0..16)
        .map(|i| (format!("dir/file{i:02}.bin"), sample(i * 300 + 7)))
        .collect::<Vec<_>>();
    let archive = PsarcArchive::new(psarc::build(files.clone(), 256, true)?)?;

    std::thread::scope(|scope| {
        let handles = files
            .iter()
            .map(|(name, data)| {
                let archive = &archive;
                scope.spawn(move || archive.extract(name).map(|actual| actual == *data))
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert!(matches!(handle.join(), Ok(Ok(true))));
        }
    });

    Ok(())
}

#[test]
fn entry_source_listing() -> Result<()> {
    let archive = PsarcArchive::new(psarc::build(
        [("b.txt", b"bb".as_slice()), ("a.txt", b"a".as_slice())],
        65536,
        true,
    )?)?
    .with_origin("mods/pack.psarc");
    let source: &dyn EntrySource = &archive;

    let listing = source
        .list_entries()
        .into_iter()
        .map(|info| (info.display_name, info.size, info.source_origin.to_string()))
        .collect::<Vec<_>>();
    assert_eq!(
        listing,
        vec![
            ("b.txt".to_string(), 2, "mods/pack.psarc".to_string()),
            ("a.txt".to_string(), 1, "mods/pack.psarc".to_string()),
        ]
    );
    assert_eq!(source.read_entry("A.TXT")?, b"a");

    Ok(())
}

#[test]
fn open_mapped_file() -> Result<()> {
    let path = std::path::Path::new(env!("CARGO_TARGET_TMPDIR")).join("open_mapped_file.psarc");
    std::fs::write(&path, psarc::build([("hello.txt", b"Hello World")], 65536, true)?)?;

    let archive = PsarcArchive::open(&path)?;
    assert_eq!(archive.origin(), path.display().to_string());
    assert_eq!(archive.extract("hello.txt")?, b"Hello World");
    drop(archive);

    std::fs::remove_file(&path)?;

    Ok(())
}
