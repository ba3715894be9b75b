use crate::replace::MODS_DIR_NAME;
use filetime::{set_file_mtime, FileTime};
use std::{
    fs::{self, File},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use thiserror::Error;
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use walkdir::WalkDir;

/// Drive identifier of the published modpack archive.
pub const MODPACK_FILE_ID: &str = "1kQ7vN3xZpR8mT2wYcL5aHj9sFdE4bGuO";
pub const FILE_ID_ENV: &str = "MODSYNC_FILE_ID";

pub const EXPORT_URL: &str = "https://docs.google.com/uc";
pub const USERCONTENT_URL: &str = "https://drive.usercontent.google.com/download";
const WARNING_COOKIE_PREFIX: &str = "download_warning";

pub const CHUNK_SIZE: usize = 32 * 1024;

const ARCHIVE_FILE_NAME: &str = "archive.zip";
const EXTRACT_DIR_NAME: &str = "extracted";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download unavailable: {reason}")]
    DownloadUnavailable { reason: String },
    #[error("could not write the download to {path}: {source}")]
    DownloadWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not extract {path}: {source}")]
    ExtractionFailed {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("no 'mods' folder inside the downloaded archive (searched {root})")]
    ModsFolderNotFound { root: PathBuf },
}

pub struct RemoteResponse {
    /// Raw `Set-Cookie` header values.
    pub cookies: Vec<String>,
    pub content_type: String,
    pub body: Box<dyn Read + Send>,
}

impl RemoteResponse {
    pub fn is_html(&self) -> bool {
        self.content_type.starts_with("text/html")
    }
}

/// One blocking HTTP GET. `cookies` are `name=value` pairs sent back in a
/// single `Cookie` header.
pub trait Transport {
    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cookies: &[String],
    ) -> Result<RemoteResponse, FetchError>;
}

/// Whether automatic downloads can be offered. Resolved once at startup.
pub enum DownloadCapability {
    Available(Box<dyn Transport>),
    Unavailable,
}

impl DownloadCapability {
    pub fn detect() -> Self {
        #[cfg(feature = "download")]
        {
            DownloadCapability::Available(Box::new(UreqTransport::new()))
        }
        #[cfg(not(feature = "download"))]
        {
            DownloadCapability::Unavailable
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, DownloadCapability::Available(_))
    }

    pub fn transport(&self) -> Result<&dyn Transport, FetchError> {
        match self {
            DownloadCapability::Available(transport) => Ok(transport.as_ref()),
            DownloadCapability::Unavailable => Err(FetchError::DownloadUnavailable {
                reason: "this build has no HTTP support".to_string(),
            }),
        }
    }
}

#[cfg(feature = "download")]
pub struct UreqTransport {
    agent: ureq::Agent,
}

#[cfg(feature = "download")]
impl UreqTransport {
    const USER_AGENT: &'static str = concat!("modsync/", env!("CARGO_PKG_VERSION"));

    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(std::time::Duration::from_secs(10))
            .timeout_read(std::time::Duration::from_secs(120))
            .build();
        Self { agent }
    }
}

#[cfg(feature = "download")]
impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "download")]
impl Transport for UreqTransport {
    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cookies: &[String],
    ) -> Result<RemoteResponse, FetchError> {
        let mut request = self.agent.get(url).set("User-Agent", Self::USER_AGENT);
        for (key, value) in query {
            request = request.query(key, value);
        }
        if !cookies.is_empty() {
            request = request.set("Cookie", &cookies.join("; "));
        }
        let response = request.call().map_err(|err| FetchError::DownloadUnavailable {
            reason: err.to_string(),
        })?;
        let cookies = response
            .all("set-cookie")
            .into_iter()
            .map(str::to_string)
            .collect();
        let content_type = response.content_type().to_string();
        Ok(RemoteResponse {
            cookies,
            content_type,
            body: Box::new(response.into_reader()),
        })
    }
}

/// A downloaded and extracted archive. The temporary workspace holding it is
/// removed when this value is dropped.
#[derive(Debug)]
pub struct FetchedArchive {
    workspace: TempDir,
    origin: PathBuf,
    bytes: u64,
}

impl FetchedArchive {
    /// Folder containing the located `mods` directory.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.bytes
    }
}

pub fn resolve_file_id(explicit: Option<&str>) -> String {
    if let Some(id) = explicit.filter(|id| !id.trim().is_empty()) {
        return id.trim().to_string();
    }
    match std::env::var(FILE_ID_ENV) {
        Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => MODPACK_FILE_ID.to_string(),
    }
}

pub fn fetch_and_locate(
    transport: &dyn Transport,
    file_id: &str,
    temp_root: &Path,
) -> Result<FetchedArchive, FetchError> {
    fs::create_dir_all(temp_root).map_err(|source| FetchError::DownloadWriteFailed {
        path: temp_root.to_path_buf(),
        source,
    })?;
    let workspace = tempfile::Builder::new()
        .prefix("fetch-")
        .tempdir_in(temp_root)
        .map_err(|source| FetchError::DownloadWriteFailed {
            path: temp_root.to_path_buf(),
            source,
        })?;
    let archive_path = workspace.path().join(ARCHIVE_FILE_NAME);
    let extract_dir = workspace.path().join(EXTRACT_DIR_NAME);

    tracing::info!(file_id, "downloading archive");
    let response = open_download(transport, file_id)?;
    let bytes = save_response(response.body, &archive_path)?;
    tracing::info!(bytes, path = %archive_path.display(), "archive downloaded");

    extract_zip(&archive_path, &extract_dir).map_err(|source| FetchError::ExtractionFailed {
        path: archive_path.clone(),
        source,
    })?;

    let mods_dir = find_mods_dir(&extract_dir).ok_or_else(|| FetchError::ModsFolderNotFound {
        root: extract_dir.clone(),
    })?;
    let origin = mods_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| extract_dir.clone());
    tracing::info!(origin = %origin.display(), "located mods folder");

    Ok(FetchedArchive {
        workspace,
        origin,
        bytes,
    })
}

fn open_download(transport: &dyn Transport, file_id: &str) -> Result<RemoteResponse, FetchError> {
    let first = transport.get(EXPORT_URL, &[("export", "download"), ("id", file_id)], &[])?;
    let session = cookie_pairs(&first.cookies);
    let response = match confirm_token(&first.cookies) {
        Some(token) => {
            tracing::debug!("large file warning; confirming download");
            transport.get(
                EXPORT_URL,
                &[("export", "download"), ("id", file_id), ("confirm", token.as_str())],
                &session,
            )?
        }
        None => first,
    };
    if !response.is_html() {
        return Ok(response);
    }

    // Newer interstitial pages carry no cookie; the usercontent host accepts a
    // blanket confirmation instead.
    tracing::debug!("interstitial page without token; retrying usercontent host");
    transport.get(
        USERCONTENT_URL,
        &[("id", file_id), ("export", "download"), ("confirm", "t")],
        &session,
    )
}

/// `name=value` part of each `Set-Cookie` value, attributes dropped.
pub fn cookie_pairs(set_cookies: &[String]) -> Vec<String> {
    set_cookies
        .iter()
        .filter_map(|cookie| {
            let pair = cookie.split(';').next()?.trim();
            pair.contains('=').then(|| pair.to_string())
        })
        .collect()
}

/// Extracts the confirmation token from `Set-Cookie` values such as
/// `download_warning_13058876669334088843_1Xa=Z9n2; Path=/uc`.
pub fn confirm_token(cookies: &[String]) -> Option<String> {
    cookies.iter().find_map(|cookie| {
        let pair = cookie.split(';').next()?.trim();
        let (name, value) = pair.split_once('=')?;
        if name.trim().starts_with(WARNING_COOKIE_PREFIX) && !value.trim().is_empty() {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

/// Reads a body in fixed-size chunks.
pub struct Chunks<R> {
    reader: R,
    done: bool,
}

impl<R: Read> Chunks<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            match self.reader.read(&mut buffer) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(read) => {
                    buffer.truncate(read);
                    return Some(Ok(buffer));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Writes every non-empty chunk in order. Read failures surface as
/// `DownloadUnavailable`, write failures as `DownloadWriteFailed`.
pub fn write_chunks<W, I>(writer: &mut W, chunks: I, path: &Path) -> Result<u64, FetchError>
where
    W: Write,
    I: IntoIterator<Item = io::Result<Vec<u8>>>,
{
    let write_failed = |source: io::Error| FetchError::DownloadWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let mut written = 0u64;
    for chunk in chunks {
        let chunk = chunk.map_err(|err| FetchError::DownloadUnavailable {
            reason: format!("connection dropped: {err}"),
        })?;
        if chunk.is_empty() {
            continue;
        }
        writer.write_all(&chunk).map_err(write_failed)?;
        written += chunk.len() as u64;
    }
    writer.flush().map_err(write_failed)?;
    Ok(written)
}

fn save_response(body: Box<dyn Read + Send>, path: &Path) -> Result<u64, FetchError> {
    let file = File::create(path).map_err(|source| FetchError::DownloadWriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    write_chunks(&mut writer, Chunks::new(body), path)
}

pub fn extract_zip(path: &Path, dest: &Path) -> zip::result::ZipResult<()> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    fs::create_dir_all(dest)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            tracing::warn!(name = entry.name(), "skipping unsafe zip entry");
            continue;
        };

        let out_path = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;
        if let Some(mtime) = entry.last_modified().and_then(zip_time_to_unix) {
            let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
        }
    }

    Ok(())
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}

/// First directory named `mods` (any case) below `root`, depth-first in
/// file-name order.
pub fn find_mods_dir(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| {
            entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.eq_ignore_ascii_case(MODS_DIR_NAME))
        })
        .map(|entry| entry.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        cell::RefCell,
        io::{Cursor, Write},
    };
    use zip::write::SimpleFileOptions;

    type Request = (String, Vec<(String, String)>, Vec<String>);

    struct FakeTransport {
        responses: RefCell<Vec<(Vec<String>, &'static str, Vec<u8>)>>,
        requests: RefCell<Vec<Request>>,
    }

    impl FakeTransport {
        fn new(responses: Vec<(Vec<String>, &'static str, Vec<u8>)>) -> Self {
            Self {
                responses: RefCell::new(responses),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn serving_zip(zip: Vec<u8>) -> Self {
            Self::new(vec![(Vec::new(), "application/zip", zip)])
        }
    }

    impl Transport for FakeTransport {
        fn get(
            &self,
            url: &str,
            query: &[(&str, &str)],
            cookies: &[String],
        ) -> Result<RemoteResponse, FetchError> {
            self.requests.borrow_mut().push((
                url.to_string(),
                query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                cookies.to_vec(),
            ));
            let mut responses = self.responses.borrow_mut();
            if responses.is_empty() {
                return Err(FetchError::DownloadUnavailable {
                    reason: "no more responses".to_string(),
                });
            }
            let (cookies, content_type, body) = responses.remove(0);
            Ok(RemoteResponse {
                cookies,
                content_type: content_type.to_string(),
                body: Box::new(Cursor::new(body)),
            })
        }
    }

    fn build_zip(dirs: &[&str], files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for dir in dirs {
            writer
                .add_directory(*dir, SimpleFileOptions::default())
                .unwrap();
        }
        for (name, bytes) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn locates_parent_of_nested_mods_folder() {
        let zip = build_zip(
            &["pack/", "pack/instance/", "pack/instance/mods/"],
            &[("pack/instance/mods/a.jar", b"jar-a"), ("pack/readme.txt", b"hi")],
        );
        let transport = FakeTransport::serving_zip(zip);
        let temp = tempfile::tempdir().unwrap();

        let fetched = fetch_and_locate(&transport, "abc", temp.path()).unwrap();

        assert!(fetched.origin().ends_with("extracted/pack/instance"));
        assert_eq!(
            fs::read(fetched.origin().join("mods/a.jar")).unwrap(),
            b"jar-a"
        );
        let requests = transport.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, EXPORT_URL);
        assert!(requests[0].1.contains(&("id".to_string(), "abc".to_string())));
    }

    #[test]
    fn match_is_case_insensitive_and_implicit_dirs_count() {
        let zip = build_zip(&[], &[("a/b/MODS/x.jar", b"x")]);
        let transport = FakeTransport::serving_zip(zip);
        let temp = tempfile::tempdir().unwrap();

        let fetched = fetch_and_locate(&transport, "abc", temp.path()).unwrap();

        assert!(fetched.origin().ends_with("extracted/a/b"));
    }

    #[test]
    fn archive_without_mods_folder_is_reported() {
        let zip = build_zip(&["pack/"], &[("pack/config/options.txt", b"1")]);
        let transport = FakeTransport::serving_zip(zip);
        let temp = tempfile::tempdir().unwrap();

        let err = fetch_and_locate(&transport, "abc", temp.path()).unwrap_err();

        assert!(matches!(err, FetchError::ModsFolderNotFound { .. }));
    }

    #[test]
    fn file_named_mods_is_not_a_match() {
        let zip = build_zip(&[], &[("pack/mods", b"not a dir")]);
        let transport = FakeTransport::serving_zip(zip);
        let temp = tempfile::tempdir().unwrap();

        let err = fetch_and_locate(&transport, "abc", temp.path()).unwrap_err();

        assert!(matches!(err, FetchError::ModsFolderNotFound { .. }));
    }

    #[test]
    fn warning_cookie_triggers_confirmed_request() {
        let zip = build_zip(&["mods/"], &[("mods/a.jar", b"a")]);
        let transport = FakeTransport::new(vec![
            (
                vec![
                    "NID=511; Path=/".to_string(),
                    "download_warning_1234_abc=Zt9q; Domain=.docs.google.com; Path=/uc".to_string(),
                ],
                "text/html; charset=utf-8",
                b"<html>virus scan warning</html>".to_vec(),
            ),
            (Vec::new(), "application/zip", zip),
        ]);
        let temp = tempfile::tempdir().unwrap();

        let fetched = fetch_and_locate(&transport, "abc", temp.path()).unwrap();

        assert!(fetched.origin().ends_with("extracted"));
        let requests = transport.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert!(requests[1]
            .1
            .contains(&("confirm".to_string(), "Zt9q".to_string())));
        assert!(requests[0].2.is_empty());
        assert_eq!(
            requests[1].2,
            vec!["NID=511".to_string(), "download_warning_1234_abc=Zt9q".to_string()]
        );
    }

    #[test]
    fn html_without_token_retries_usercontent_host() {
        let zip = build_zip(&["mods/"], &[]);
        let transport = FakeTransport::new(vec![
            (Vec::new(), "text/html", b"<form></form>".to_vec()),
            (Vec::new(), "application/octet-stream", zip),
        ]);
        let temp = tempfile::tempdir().unwrap();

        fetch_and_locate(&transport, "abc", temp.path()).unwrap();

        let requests = transport.requests.borrow();
        assert_eq!(requests[1].0, USERCONTENT_URL);
        assert!(requests[1]
            .1
            .contains(&("confirm".to_string(), "t".to_string())));
    }

    #[test]
    fn non_zip_payload_fails_extraction() {
        let transport = FakeTransport::new(vec![(
            Vec::new(),
            "application/octet-stream",
            b"definitely not a zip".to_vec(),
        )]);
        let temp = tempfile::tempdir().unwrap();

        let err = fetch_and_locate(&transport, "abc", temp.path()).unwrap_err();

        assert!(matches!(err, FetchError::ExtractionFailed { .. }));
    }

    #[test]
    fn transport_failure_is_unavailable() {
        let transport = FakeTransport::new(Vec::new());
        let temp = tempfile::tempdir().unwrap();

        let err = fetch_and_locate(&transport, "abc", temp.path()).unwrap_err();

        assert!(matches!(err, FetchError::DownloadUnavailable { .. }));
    }

    #[test]
    fn workspace_is_removed_on_drop_and_on_failure() {
        let temp = tempfile::tempdir().unwrap();
        let zip = build_zip(&["mods/"], &[("mods/a.jar", b"a")]);
        let fetched =
            fetch_and_locate(&FakeTransport::serving_zip(zip), "abc", temp.path()).unwrap();
        let workspace = fetched.workspace().to_path_buf();
        assert!(workspace.is_dir());
        drop(fetched);
        assert!(!workspace.exists());

        let zip = build_zip(&["other/"], &[]);
        let _ = fetch_and_locate(&FakeTransport::serving_zip(zip), "abc", temp.path());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn chunks_are_written_in_order_skipping_empty_ones() {
        let chunks: Vec<io::Result<Vec<u8>>> = vec![
            Ok(b"abc".to_vec()),
            Ok(Vec::new()),
            Ok(b"def".to_vec()),
            Ok(Vec::new()),
            Ok(Vec::new()),
            Ok(b"g".to_vec()),
        ];
        let mut out = Vec::new();

        let written = write_chunks(&mut out, chunks, Path::new("out.zip")).unwrap();

        assert_eq!(out, b"abcdefg");
        assert_eq!(written, 7);
    }

    #[test]
    fn chunk_reader_splits_large_bodies() {
        let body = vec![7u8; CHUNK_SIZE * 2 + 5];
        let sizes: Vec<usize> = Chunks::new(Cursor::new(body))
            .map(|chunk| chunk.unwrap().len())
            .collect();

        assert_eq!(sizes, vec![CHUNK_SIZE, CHUNK_SIZE, 5]);
    }

    #[test]
    fn read_error_mid_stream_is_unavailable() {
        let chunks: Vec<io::Result<Vec<u8>>> = vec![
            Ok(b"abc".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut out = Vec::new();

        let err = write_chunks(&mut out, chunks, Path::new("out.zip")).unwrap_err();

        assert!(matches!(err, FetchError::DownloadUnavailable { .. }));
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_error_is_download_write_failed() {
        let chunks: Vec<io::Result<Vec<u8>>> = vec![Ok(b"abc".to_vec())];

        let err = write_chunks(&mut FullDisk, chunks, Path::new("archive.zip")).unwrap_err();

        match err {
            FetchError::DownloadWriteFailed { path, source } => {
                assert_eq!(path, Path::new("archive.zip"));
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unwritable_temp_root_is_download_write_failed() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("tmp");
        fs::write(&blocker, b"a file, not a dir").unwrap();
        let zip = build_zip(&["mods/"], &[]);

        let err = fetch_and_locate(&FakeTransport::serving_zip(zip), "abc", &blocker).unwrap_err();

        assert!(matches!(err, FetchError::DownloadWriteFailed { path, .. } if path == blocker));
    }

    #[test]
    fn cookie_pairs_drop_attributes() {
        let cookies = vec![
            "NID=511; Path=/; HttpOnly".to_string(),
            "garbage".to_string(),
            "download_warning_x=tok".to_string(),
        ];

        assert_eq!(
            cookie_pairs(&cookies),
            vec!["NID=511".to_string(), "download_warning_x=tok".to_string()]
        );
    }

    #[test]
    fn token_parsing_ignores_unrelated_cookies() {
        assert_eq!(confirm_token(&["SID=1; Path=/".to_string()]), None);
        assert_eq!(
            confirm_token(&["download_warning_x=tok".to_string()]),
            Some("tok".to_string())
        );
        assert_eq!(confirm_token(&["download_warning_x=; Path=/".to_string()]), None);
    }

    #[test]
    fn explicit_file_id_wins() {
        assert_eq!(resolve_file_id(Some("  custom ")), "custom");
    }
}
