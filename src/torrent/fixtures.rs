//! Hand-built descriptors for tests
//!
//! Dictionaries are written with sorted keys so the `info` slice is already
//! canonical and its SHA-1 can be compared against the parser's info hash.

pub(crate) fn bytes(value: &[u8]) -> Vec<u8> {
    let mut out = format!("{}:", value.len()).into_bytes();
    out.extend_from_slice(value);
    out
}

pub(crate) fn int(value: i64) -> Vec<u8> {
    format!("i{}e", value).into_bytes()
}

pub(crate) fn dict(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut out = b"d".to_vec();
    for (key, value) in entries {
        out.extend(bytes(key.as_bytes()));
        out.extend_from_slice(value);
    }
    out.push(b'e');
    out
}

pub(crate) fn list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = b"l".to_vec();
    for item in items {
        out.extend_from_slice(item);
    }
    out.push(b'e');
    out
}

/// `info` dictionary of a single-file torrent with one piece
pub(crate) fn single_file_info(name: &str, length: i64) -> Vec<u8> {
    dict(&[
        ("length", int(length)),
        ("name", bytes(name.as_bytes())),
        ("piece length", int(16384)),
        ("pieces", bytes(&[0xab; 20])),
    ])
}

/// `info` dictionary of a multi-file torrent; each file is `(path components, length)`
pub(crate) fn multi_file_info(name: &str, files: &[(&[&str], i64)]) -> Vec<u8> {
    let entries: Vec<Vec<u8>> = files
        .iter()
        .map(|(path, length)| {
            let components: Vec<Vec<u8>> = path.iter().map(|c| bytes(c.as_bytes())).collect();
            dict(&[("length", int(*length)), ("path", list(&components))])
        })
        .collect();
    dict(&[
        ("files", list(&entries)),
        ("name", bytes(name.as_bytes())),
        ("piece length", int(32768)),
        ("pieces", bytes(&[0x11; 40])),
    ])
}

/// Wrap an `info` dictionary into a complete descriptor
pub(crate) fn descriptor(info: Vec<u8>) -> Vec<u8> {
    dict(&[
        ("announce", bytes(b"http://tracker.example/announce")),
        (
            "announce-list",
            list(&[
                list(&[bytes(b"http://tracker.example/announce")]),
                list(&[bytes(b"udp://backup.example:6969")]),
            ]),
        ),
        ("info", info),
    ])
}

/// Complete single-file descriptor
pub(crate) fn single_file(name: &str, length: i64) -> Vec<u8> {
    descriptor(single_file_info(name, length))
}

/// Complete multi-file descriptor
pub(crate) fn multi_file(name: &str, files: &[(&[&str], i64)]) -> Vec<u8> {
    descriptor(multi_file_info(name, files))
}

/// Descriptor built from raw `info` entries, for malformed cases
pub(crate) fn with_info_entries(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    descriptor(dict(entries))
}
