//! Thin command handlers: control-socket queries and standalone tools.

use std::fs;
use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::config::{self, Config};
use crate::core::bencode::Value;
use crate::core::metainfo::{InfoHash, MetaInfo};
use crate::core::hex;
use crate::daemon::client::{message_tag, ControlClient};
use crate::{Error, Result};

fn connect(config: &Config) -> Result<ControlClient<UnixStream>> {
    let path = config
        .control
        .socket_path
        .clone()
        .unwrap_or_else(config::default_socket_path);
    Ok(ControlClient::connect_unix(&path)?)
}

/// Unwrap a reply of the wanted tag or surface the daemon's diagnostic.
fn expect_tag(reply: Vec<Value>, want: &str) -> Result<Vec<Value>> {
    let tag = message_tag(&reply);
    if tag == want {
        return Ok(reply);
    }
    let mut detail = String::new();
    // ARGERROR/COMMANDFAIL carry a human diagnostic after the echoed list.
    if let Some(bytes) = reply.get(2).and_then(Value::as_bytes) {
        detail = format!(": {}", String::from_utf8_lossy(bytes));
    }
    Err(Error::Tool(format!("daemon replied {tag}{detail}")))
}

pub fn count(config: &Config) -> Result<()> {
    let mut client = connect(config)?;
    let reply = client.request("GETCLIENTCOUNT", vec![])?;
    let reply = expect_tag(reply, "CLIENTCOUNT")?;
    let count = reply.get(1).and_then(Value::as_int).unwrap_or(0);
    println!("{count}");
    Ok(())
}

pub fn clients(config: &Config) -> Result<()> {
    let mut client = connect(config)?;
    let reply = client.request("GETCLIENTCOUNT", vec![])?;
    let reply = expect_tag(reply, "CLIENTCOUNT")?;
    let count = reply.get(1).and_then(Value::as_int).unwrap_or(0).max(0) as usize;

    for idx in 0..count {
        let reply = client.request(
            "GETCLIENTDATA",
            vec![Value::Int(idx as i64)],
        )?;
        let reply = expect_tag(reply, "CLIENTDATA")?;
        match reply.get(2) {
            Some(data) => println!("client {idx}: {data:?}"),
            None => println!("client {idx}: <no data>"),
        }
    }
    Ok(())
}

pub fn torrents(config: &Config, client_idx: usize) -> Result<()> {
    let mut client = connect(config)?;
    let reply = client.request(
        "GETCLIENTTORRENTS",
        vec![Value::Int(client_idx as i64)],
    )?;
    let reply = expect_tag(reply, "CLIENTTORRENTS")?;
    let hashes = reply.get(2).and_then(Value::as_list).unwrap_or(&[]);
    for hash in hashes {
        if let Some(bytes) = hash.as_bytes() {
            println!("{}", hex(bytes));
        }
    }
    Ok(())
}

pub fn throughput(
    config: &Config,
    client_idx: usize,
    info_hash: &str,
    samples: usize,
) -> Result<()> {
    let hash: InfoHash = info_hash.parse().map_err(Error::MetaInfo)?;
    let mut client = connect(config)?;
    let reply = client.request(
        "GETBTHTHROUGHPUT",
        vec![
            Value::Int(client_idx as i64),
            Value::bytes(hash.as_bytes().to_vec()),
            Value::Int(samples as i64),
        ],
    )?;
    let reply = expect_tag(reply, "BTHTHROUGHPUT")?;

    let cycle_down = reply.get(3).and_then(Value::as_int).unwrap_or(0);
    let cycle_up = reply.get(5).and_then(Value::as_int).unwrap_or(0);
    println!("down (cycle {cycle_down} ms): {}", render_samples(reply.get(4)));
    println!("up   (cycle {cycle_up} ms): {}", render_samples(reply.get(6)));
    Ok(())
}

fn render_samples(list: Option<&Value>) -> String {
    let Some(items) = list.and_then(Value::as_list) else {
        return "-".to_string();
    };
    items
        .iter()
        .map(|v| match v.as_int() {
            Some(-1) => "-".to_string(),
            Some(n) => n.to_string(),
            None => "?".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn metainfo_dump(file: &Path) -> Result<()> {
    let raw = fs::read(file).map_err(|err| Error::Tool(format!("read {file:?}: {err}")))?;
    let mi = MetaInfo::from_benc_bytes(&raw)?;

    let urls: Vec<String> = mi.announce_tiers.iter().flatten().cloned().collect();
    println!("{:>14} {}", "announce urls:", urls.join(" "));
    println!("{:>14}", "files:");
    for target in &mi.files {
        println!("   {:?} ({} bytes)", target.path, target.length);
    }
    println!("{:>14} {}", "piece length:", mi.piece_length);
    println!("{:>14} {}", "total length:", mi.total_length);
    println!("{:>14} {}", "piece count:", mi.piece_count());
    println!("{:>14} {}", "basename:", mi.basename);
    println!("{:>14} {}", "info hash:", mi.info_hash);
    if let Some(creator) = &mi.creator {
        println!("{:>14} {creator}", "creator:");
    }
    if let Some(comment) = &mi.comment {
        println!("{:>14} {comment}", "comment:");
    }
    if let Some(ts) = mi.creation_ts {
        println!("{:>14} {ts}", "creation ts:");
    }
    Ok(())
}

pub fn verify(file: &Path, data_dir: &Path) -> Result<()> {
    let raw = fs::read(file).map_err(|err| Error::Tool(format!("read {file:?}: {err}")))?;
    let mi = MetaInfo::from_benc_bytes(&raw)?;
    let bad = verify_pieces(&mi, data_dir)?;

    let total = mi.piece_count();
    if bad.is_empty() {
        println!("{total}/{total} pieces ok");
        Ok(())
    } else {
        for idx in &bad {
            println!("piece {idx} mismatch");
        }
        Err(Error::Tool(format!(
            "{} of {total} pieces failed verification",
            bad.len()
        )))
    }
}

/// Hash the on-disk content in torrent order and return the indices of the
/// pieces whose hash does not match.
fn verify_pieces(mi: &MetaInfo, data_dir: &Path) -> Result<Vec<usize>> {
    // Multi-file torrents live under their basename directory; single-file
    // torrents sit directly in the data dir.
    let root = if mi.files.len() > 1 {
        data_dir.join(&mi.basename)
    } else {
        data_dir.to_path_buf()
    };

    let mut bad = Vec::new();
    let mut hasher = Sha1::new();
    let mut piece_filled: u64 = 0;
    let mut piece_idx = 0usize;
    let piece_length = mi.piece_length.max(1);
    let mut buf = vec![0u8; 1 << 16];

    for target in &mi.files {
        let path = root.join(&target.path);
        let mut file =
            fs::File::open(&path).map_err(|err| Error::Tool(format!("open {path:?}: {err}")))?;
        let mut remaining = target.length;
        while remaining > 0 {
            let want = buf.len().min(remaining as usize);
            let n = file
                .read(&mut buf[..want])
                .map_err(|err| Error::Tool(format!("read {path:?}: {err}")))?;
            if n == 0 {
                return Err(Error::Tool(format!(
                    "{path:?} is shorter than the metainfo declares"
                )));
            }
            remaining -= n as u64;

            let mut chunk = &buf[..n];
            while !chunk.is_empty() {
                let space = (piece_length - piece_filled) as usize;
                let take = chunk.len().min(space);
                hasher.update(&chunk[..take]);
                piece_filled += take as u64;
                chunk = &chunk[take..];

                if piece_filled == piece_length {
                    finish_piece(&mut hasher, mi, piece_idx, &mut bad)?;
                    piece_idx += 1;
                    piece_filled = 0;
                }
            }
        }
    }

    if piece_filled > 0 {
        finish_piece(&mut hasher, mi, piece_idx, &mut bad)?;
        piece_idx += 1;
    }
    if piece_idx != mi.piece_count() {
        return Err(Error::Tool(format!(
            "content covers {piece_idx} pieces, metainfo declares {}",
            mi.piece_count()
        )));
    }
    Ok(bad)
}

fn finish_piece(
    hasher: &mut Sha1,
    mi: &MetaInfo,
    piece_idx: usize,
    bad: &mut Vec<usize>,
) -> Result<()> {
    let digest: [u8; 20] = std::mem::take(hasher).finalize().into();
    let expected = mi
        .piece_hashes
        .get(piece_idx)
        .ok_or_else(|| Error::Tool("content longer than the declared piece count".to_string()))?;
    if digest != *expected {
        bad.push(piece_idx);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent_for(content: &[u8], piece_length: usize, name: &str) -> Vec<u8> {
        let pieces: Vec<u8> = content
            .chunks(piece_length)
            .flat_map(|chunk| {
                let digest: [u8; 20] = Sha1::digest(chunk).into();
                digest
            })
            .collect();
        Value::dict(vec![
            (b"announce".to_vec(), Value::str("http://t/a")),
            (
                b"info".to_vec(),
                Value::dict(vec![
                    (b"length".to_vec(), Value::Int(content.len() as i64)),
                    (b"name".to_vec(), Value::str(name)),
                    (b"piece length".to_vec(), Value::Int(piece_length as i64)),
                    (b"pieces".to_vec(), Value::Bytes(pieces)),
                ]),
            ),
        ])
        .encode()
    }

    #[test]
    fn verify_accepts_intact_content() {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![7u8; 100];
        fs::write(dir.path().join("a.bin"), &content).unwrap();
        let raw = torrent_for(&content, 32, "a.bin");
        let mi = MetaInfo::from_benc_bytes(&raw).unwrap();

        assert_eq!(verify_pieces(&mi, dir.path()).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn verify_flags_corrupt_piece() {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![7u8; 100];
        let raw = torrent_for(&content, 32, "a.bin");
        let mut corrupted = content;
        corrupted[40] ^= 0xff; // inside piece 1
        fs::write(dir.path().join("a.bin"), &corrupted).unwrap();
        let mi = MetaInfo::from_benc_bytes(&raw).unwrap();

        assert_eq!(verify_pieces(&mi, dir.path()).unwrap(), vec![1]);
    }

    #[test]
    fn verify_errors_on_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![7u8; 100];
        let raw = torrent_for(&content, 32, "a.bin");
        fs::write(dir.path().join("a.bin"), &content[..50]).unwrap();
        let mi = MetaInfo::from_benc_bytes(&raw).unwrap();

        assert!(verify_pieces(&mi, dir.path()).is_err());
    }
}
