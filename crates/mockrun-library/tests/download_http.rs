//! Downloader and release client against a real in-process HTTP server.

use mockrun_library::{
    ArchiveFormat, DownloadConfig, Downloader, GithubReleases, LibraryError, ReleaseSource,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tiny_http::{Response, Server, StatusCode};

struct TestServer {
    url: String,
    hits: Arc<Mutex<Vec<String>>>,
    _server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    fn start(routes: HashMap<String, Vec<u8>>) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let srv = Arc::clone(&server);
        let hits_clone = Arc::clone(&hits);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                let path = request.url().to_owned();
                hits_clone.lock().unwrap().push(path.clone());
                let response = match routes.get(&path) {
                    Some(body) => Response::from_data(body.clone()),
                    None => Response::from_string("missing").with_status_code(StatusCode(404)),
                };
                let _ = request.respond(response);
            }
        });

        Self {
            url: format!("http://127.0.0.1:{port}"),
            hits,
            _server: server,
            _handle: handle,
        }
    }

    fn config(&self) -> DownloadConfig {
        DownloadConfig::new(
            &format!("{}/latest/download", self.url),
            &format!("{}/download/v{{version}}", self.url),
        )
    }

    fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

fn routes(entries: &[(&str, &[u8])]) -> HashMap<String, Vec<u8>> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.to_vec()))
        .collect()
}

fn tar_gz_bytes(name: &str, data: &[u8]) -> Vec<u8> {
    let gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, name, data).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn assert_no_temp_files(dir: &Path) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let name = entry.unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(
            !name.starts_with(".tmp") && !name.starts_with(".staging-"),
            "leftover temp entry {name}"
        );
    }
}

#[test]
fn latest_artifact_is_written_atomically() {
    let server = TestServer::start(routes(&[("/latest/download/imposter.jar", b"jar-bytes")]));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("jvm").join("latest").join("imposter.jar");

    Downloader::new()
        .fetch_artifact(&server.config(), &dest, "imposter.jar", "latest", None)
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), b"jar-bytes");
    assert_no_temp_files(dest.parent().unwrap());
}

#[test]
fn versioned_not_found_retries_with_fallback_name() {
    let server = TestServer::start(routes(&[(
        "/download/v4.0.0/imposter-4.0.0.jar",
        b"legacy-jar",
    )]));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("imposter.jar");

    Downloader::new()
        .fetch_artifact(
            &server.config(),
            &dest,
            "imposter.jar",
            "4.0.0",
            Some("imposter-4.0.0.jar"),
        )
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), b"legacy-jar");
    assert_eq!(
        server.hits(),
        vec![
            "/download/v4.0.0/imposter.jar".to_owned(),
            "/download/v4.0.0/imposter-4.0.0.jar".to_owned(),
        ]
    );
}

#[test]
fn latest_not_found_is_not_retried() {
    let server = TestServer::start(HashMap::new());
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("imposter.jar");

    let err = Downloader::new()
        .fetch_artifact(
            &server.config(),
            &dest,
            "imposter.jar",
            "latest",
            Some("imposter-latest.jar"),
        )
        .unwrap_err();

    assert!(err.is_not_found(), "{err}");
    assert_eq!(server.hits().len(), 1);
    assert!(!dest.exists());
}

#[test]
fn empty_body_is_rejected_and_nothing_is_placed() {
    let server = TestServer::start(routes(&[("/download/v1.0.0/imposter.jar", b"")]));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("imposter.jar");

    let err = Downloader::new()
        .fetch_artifact(&server.config(), &dest, "imposter.jar", "1.0.0", None)
        .unwrap_err();

    assert!(matches!(err, LibraryError::EmptyBody(_)), "{err}");
    assert!(!dest.exists());
    assert_no_temp_files(dir.path());
}

#[test]
fn archive_artifact_is_extracted_into_place() {
    let archive = tar_gz_bytes("imposter-go", b"#!/bin/sh\n");
    let server = TestServer::start(routes(&[(
        "/download/v1.5.0/imposter-go_linux_amd64.tar.gz",
        archive.as_slice(),
    )]));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("golang").join("1.5.0");

    let config = server.config().extracting(ArchiveFormat::TarGz);
    Downloader::new()
        .fetch_artifact(
            &config,
            &dest,
            "imposter-go_linux_amd64.tar.gz",
            "1.5.0",
            None,
        )
        .unwrap();

    assert_eq!(std::fs::read(dest.join("imposter-go")).unwrap(), b"#!/bin/sh\n");
    assert_no_temp_files(dest.parent().unwrap());
}

#[test]
fn release_tag_is_read_from_metadata() {
    let server = TestServer::start(routes(&[(
        "/repos/imposter-project/imposter-go/releases/latest",
        br#"{"tag_name":"v1.7.2","prerelease":false}"#,
    )]));
    let releases = GithubReleases::with_api_base(&server.url, "imposter-project");
    assert_eq!(releases.latest_tag("imposter-go").unwrap(), "v1.7.2");
}

#[test]
fn release_metadata_without_tag_is_serialization_error() {
    let server = TestServer::start(routes(&[(
        "/repos/imposter-project/imposter-go/releases/latest",
        br#"{"message":"rate limited"}"#,
    )]));
    let releases = GithubReleases::with_api_base(&server.url, "imposter-project");
    let err = releases.latest_tag("imposter-go").unwrap_err();
    assert!(matches!(err, LibraryError::Serialization(_)), "{err}");
}
