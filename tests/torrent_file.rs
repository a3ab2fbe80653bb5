use bitpiece::{bencode, Torrent, TorrentError};
use sha1::{Digest, Sha1};

const SAMPLE: &[u8] = b"d8:announce39:http://bittorrent-test-tracker/announce10:created by13:mktorrent 1.14:infod6:lengthi92063e4:name10:sample.txt12:piece lengthi32768e6:pieces60:aaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbcccccccccccccccccccc7:privatei1eee";

#[test]
fn reads_torrent_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.torrent");
    std::fs::write(&path, SAMPLE).unwrap();

    let torrent = Torrent::read(&path).unwrap();
    assert_eq!(
        torrent.announce_url().unwrap(),
        "http://bittorrent-test-tracker/announce"
    );
    assert_eq!(torrent.size, 92063);
    assert_eq!(torrent.piece_len, 32768);
    assert_eq!(torrent.name.as_deref(), Some("sample.txt"));
    assert_eq!(torrent.piece_hashes().len(), 3);
    assert_eq!(torrent.piece_hash(1), Some(&[b'b'; 20]));

    // already canonical, so re-encoding reproduces the source bytes
    let root = bencode::decode(SAMPLE).unwrap();
    assert_eq!(bencode::encode(&root), SAMPLE);

    let info_start = SAMPLE.windows(6).position(|w| w == b"4:info").unwrap() + 6;
    let info_bytes = &SAMPLE[info_start..SAMPLE.len() - 1];
    let expected: [u8; 20] = Sha1::digest(info_bytes).into();
    assert_eq!(torrent.info_hash(), expected);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Torrent::read(dir.path().join("absent.torrent")),
        Err(TorrentError::Io(_))
    ));
}
