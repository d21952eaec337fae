use std::collections::HashMap;
use std::fs::File;
use std::io::Read as _;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use assert_cmd::Command;

static MAP_PNG: &[u8] = &[
    137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 4, 0,
    0, 0, 181, 28, 12, 2, 0, 0, 0, 11, 73, 68, 65, 84, 120, 218, 99, 252, 255, 23, 0, 2, 3, 1, 128,
    110, 220, 25, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
];

fn story_page(host: &str, title: &str, pager_options: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
  <head><title>{title}</title></head>
  <body>
    <div class="b-story-header"><h1>{title}</h1>
    by <a href="//{host}/member?uid=7&amp;page=submissions">captain_wordsworth</a></div>
    <div class="b-pager-pages"><select name="page">{pager_options}</select></div>
    <div class="b-story-body-x x-r15"><div>{body}</div></div>
  </body>
</html>
"#
    )
}

fn member_page(host: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
  <body>
    <span class="unameClick"><a href="//{host}/member?uid=7">captain_wordsworth</a></span>
    <table class="b-memberpage-submissions"><col width="60%">
<tr class="st-top"><td>Title</td><td>Description</td><td>Category</td><td>Date</td></tr>
<tr class="root-story r-ott"><td><a href="//{host}/s/the-lighthouse">The Lighthouse</a> (4.62)</td><td>A keeper's vigil. <img src="/i/ico_h.gif"></td><td><span>Romance</span></td><td>01/02/03</td></tr>
<tr class="ser-ttl"><td colspan="4"><strong>Voyages: 3 Part Series</strong></td></tr>
<tr class="sl"><td><a href="//{host}/s/voyages-pt-01">Voyages Pt. 01</a> (4.10)</td><td>Setting sail.</td><td><span>Adventure</span></td><td>02/03/04</td></tr>
<tr class="sl"><td><a href="//{host}/s/voyages-pt-02">Voyages Pt. 02</a> (4.20)</td><td>Stormy seas.</td><td><span>Adventure</span></td><td>03/04/05</td></tr>
<tr class="sl"><td><a href="//{host}/s/voyages-pt-03">Voyages Pt. 03</a> (4.30)</td><td>Landfall.</td><td><span>Adventure</span></td><td>04/05/06</td></tr>
    </table>
  </body>
</html>
"#
    )
}

fn spawn_site_server() -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let addr = server.server_addr();
    let host = format!("{addr}");
    let base_url = format!("http://{host}");

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let url = request.url().to_string();
            let (path, query) = match url.split_once('?') {
                Some((path, query)) => (path, query),
                None => (url.as_str(), ""),
            };

            enum Body {
                Html(String),
                Png(&'static [u8]),
            }

            let body = match path {
                "/member" => Some(Body::Html(member_page(&host))),
                "/s/the-lighthouse" => Some(Body::Html(story_page(
                    &host,
                    "The Lighthouse",
                    "",
                    "<p>The keeper lit the lamp.</p>",
                ))),
                "/s/voyages-pt-01" if query.contains("page=2") => Some(Body::Html(story_page(
                    &host,
                    "Voyages Pt. 01",
                    r#"<option value="1">1</option><option value="2">2</option>"#,
                    "<p>Open water.</p>",
                ))),
                "/s/voyages-pt-01" => Some(Body::Html(story_page(
                    &host,
                    "Voyages Pt. 01",
                    r#"<option value="1">1</option><option value="2">2</option>"#,
                    "<p>Setting out from harbor.</p>",
                ))),
                "/s/voyages-pt-02" => Some(Body::Html(story_page(
                    &host,
                    "Voyages Pt. 02",
                    "",
                    r#"Stormy </i>seas ahead.<IMG SRC="/art/map.png"> Land ho!<br>"#,
                ))),
                "/s/voyages-pt-03" => Some(Body::Html(story_page(
                    &host,
                    "Voyages Pt. 03",
                    "",
                    "<p>Landfall at last.</p>",
                ))),
                "/art/map.png" => Some(Body::Png(MAP_PNG)),
                _ => None,
            };

            let response = match body {
                Some(Body::Html(html)) => tiny_http::Response::from_string(html)
                    .with_header(
                        tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/html; charset=utf-8"[..],
                        )
                        .expect("build header"),
                    )
                    .boxed(),
                Some(Body::Png(bytes)) => tiny_http::Response::from_data(bytes.to_vec())
                    .with_header(
                        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"image/png"[..])
                            .expect("build header"),
                    )
                    .boxed(),
                None => tiny_http::Response::from_string("not found")
                    .with_status_code(404)
                    .boxed(),
            };

            let _ = request.respond(response);
        }
    });

    (base_url, shutdown_tx, handle)
}

fn open_archive(path: &Path) -> zip::ZipArchive<File> {
    zip::ZipArchive::new(File::open(path).expect("open epub")).expect("read epub")
}

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> String {
    let mut out = String::new();
    archive
        .by_name(name)
        .unwrap_or_else(|_| panic!("no entry {name}"))
        .read_to_string(&mut out)
        .expect("read entry");
    out
}

fn read_entry_bytes(archive: &mut zip::ZipArchive<File>, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    archive
        .by_name(name)
        .unwrap_or_else(|_| panic!("no entry {name}"))
        .read_to_end(&mut out)
        .expect("read entry");
    out
}

#[test]
fn single_story_becomes_a_one_section_epub() {
    let (base_url, shutdown, handle) = spawn_site_server();
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("story.epub");

    Command::cargo_bin("storybookify")
        .expect("binary")
        .arg(format!("{base_url}/s/the-lighthouse"))
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    let mut archive = open_archive(&out);

    // The mimetype entry leads the archive, uncompressed.
    {
        let entry = archive.by_index(0).expect("first entry");
        assert_eq!(entry.name(), "mimetype");
        assert_eq!(entry.compression(), zip::CompressionMethod::Stored);
    }
    assert_eq!(read_entry(&mut archive, "mimetype"), "application/epub+zip");

    read_entry(&mut archive, "META-INF/container.xml");

    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert!(opf.contains("<dc:title>The Lighthouse</dc:title>"));
    assert!(opf.contains("<dc:creator>captain_wordsworth</dc:creator>"));
    assert_eq!(opf.matches("<item id=\"html_").count(), 1);
    assert!(opf.contains("<item id=\"html_1\" href=\"content01.html\""));
    assert!(opf.contains("<itemref idref=\"html_1\"/>"));

    let ncx = read_entry(&mut archive, "OEBPS/toc.ncx");
    assert!(ncx.contains("playOrder=\"1\""));
    assert!(!ncx.contains("playOrder=\"2\""));
    assert!(ncx.contains("<text>The Lighthouse - A keeper's vigil.</text>"));

    let section = read_entry(&mut archive, "OEBPS/content01.html");
    assert!(section.contains("<h2>The Lighthouse</h2>"));
    assert!(section.contains("<p>The keeper lit the lamp.</p>"));

    let cover = read_entry(&mut archive, "OEBPS/cover.html");
    assert!(cover.contains("The Lighthouse"));
    assert!(cover.contains("by <i>captain_wordsworth</i>"));

    let _ = shutdown.send(());
    handle.join().expect("server thread");
}

#[test]
fn series_member_url_expands_to_the_full_series() {
    let (base_url, shutdown, handle) = spawn_site_server();
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("series.epub");

    Command::cargo_bin("storybookify")
        .expect("binary")
        .arg(format!("{base_url}/s/voyages-pt-02"))
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    let mut archive = open_archive(&out);

    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert!(opf.contains("<dc:title>Voyages</dc:title>"));
    assert_eq!(opf.matches("<item id=\"html_").count(), 3);

    // Spine follows catalogue order.
    let spine_positions: Vec<usize> = (1..=3)
        .map(|n| {
            opf.find(&format!("<itemref idref=\"html_{n}\"/>"))
                .expect("spine entry")
        })
        .collect();
    assert!(spine_positions[0] < spine_positions[1]);
    assert!(spine_positions[1] < spine_positions[2]);
    assert!(opf.contains("<item id=\"html_1\" href=\"part01x01.html\""));
    assert!(opf.contains("<item id=\"html_2\" href=\"part01x02.html\""));
    assert!(opf.contains("<item id=\"html_3\" href=\"part01x03.html\""));
    assert!(opf.contains("<itemref idref=\"cover\" linear=\"no\"/>"));

    let ncx = read_entry(&mut archive, "OEBPS/toc.ncx");
    for (n, label) in [
        (1, "Voyages Pt. 01 - Setting sail."),
        (2, "Voyages Pt. 02 - Stormy seas."),
        (3, "Voyages Pt. 03 - Landfall."),
    ] {
        assert!(ncx.contains(&format!("playOrder=\"{n}\"")));
        assert!(ncx.contains(&format!("<text>{label}</text>")));
    }

    // Both pages of the paginated part were joined.
    let part1 = read_entry(&mut archive, "OEBPS/part01x01.html");
    assert!(part1.contains("Setting out from harbor."));
    assert!(part1.contains("Open water."));

    // The illustrated part got its markup repaired and its image embedded.
    let part2 = read_entry(&mut archive, "OEBPS/part01x02.html");
    assert!(part2.contains("Stormy seas ahead."));
    assert!(!part2.contains("</i>seas"));
    assert!(part2.contains("<img src=\"images/001map.png\"/>"));
    assert!(part2.contains("Land ho!<br/>"));

    assert!(opf.contains("<item id=\"img001\" href=\"images/001map.png\" media-type=\"image/png\"/>"));
    assert_eq!(read_entry_bytes(&mut archive, "OEBPS/images/001map.png"), MAP_PNG);

    let _ = shutdown.send(());
    handle.join().expect("server thread");
}

#[test]
fn single_flag_suppresses_series_and_flags_trim_teaser_and_images() {
    let (base_url, shutdown, handle) = spawn_site_server();
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("single.epub");

    Command::cargo_bin("storybookify")
        .expect("binary")
        .arg(format!("{base_url}/s/voyages-pt-02"))
        .args(["--single", "--no-teaser", "--no-images"])
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    let mut archive = open_archive(&out);

    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert_eq!(opf.matches("<item id=\"html_").count(), 1);
    assert!(opf.contains("<item id=\"html_1\" href=\"content01.html\""));
    assert!(!opf.contains("images/"));

    let ncx = read_entry(&mut archive, "OEBPS/toc.ncx");
    assert!(ncx.contains("<text>Voyages Pt. 02</text>"));
    assert!(!ncx.contains("Stormy seas."));

    let section = read_entry(&mut archive, "OEBPS/content01.html");
    assert!(!section.contains("<img"));
    assert!(section.contains("Stormy seas ahead."));

    let _ = shutdown.send(());
    handle.join().expect("server thread");
}

#[test]
fn multiple_urls_build_one_combined_volume() {
    let (base_url, shutdown, handle) = spawn_site_server();
    let dir = tempfile::tempdir().expect("tempdir");

    Command::cargo_bin("storybookify")
        .expect("binary")
        .arg(format!("{base_url}/s/the-lighthouse"))
        .arg(format!("{base_url}/s/voyages-pt-01"))
        .args(["--title", "Collected: Works"])
        .current_dir(dir.path())
        .assert()
        .success();

    // Default file name derives from the title with unsafe characters
    // flattened.
    let out = dir.path().join("Collected_ Works.epub");
    assert!(out.is_file(), "expected {} to exist", out.display());

    let mut archive = open_archive(&out);
    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert!(opf.contains("<dc:title>Collected: Works</dc:title>"));
    assert!(opf.contains("href=\"content01.html\""));
    assert!(opf.contains("href=\"part02x01.html\""));
    assert!(opf.contains("href=\"part02x02.html\""));
    assert!(opf.contains("href=\"part02x03.html\""));
    assert_eq!(opf.matches("<item id=\"html_").count(), 4);

    let _ = shutdown.send(());
    handle.join().expect("server thread");
}

#[test]
fn disk_cache_replays_a_run_with_the_network_gone() {
    let (base_url, shutdown, handle) = spawn_site_server();
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = dir.path().join("cache");
    let first_out = dir.path().join("first.epub");
    let second_out = dir.path().join("second.epub");

    Command::cargo_bin("storybookify")
        .expect("binary")
        .arg(format!("{base_url}/s/voyages-pt-01"))
        .arg("--disk-cache-path")
        .arg(&cache)
        .arg("-o")
        .arg(&first_out)
        .assert()
        .success();

    // Take the site away; the second run must come entirely from the cache.
    let _ = shutdown.send(());
    handle.join().expect("server thread");

    Command::cargo_bin("storybookify")
        .expect("binary")
        .arg(format!("{base_url}/s/voyages-pt-01"))
        .arg("--disk-cache-path")
        .arg(&cache)
        .arg("-o")
        .arg(&second_out)
        .assert()
        .success();

    let entries = |path: &Path| -> HashMap<String, Vec<u8>> {
        let mut archive = open_archive(path);
        let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        names
            .into_iter()
            .map(|name| {
                let bytes = read_entry_bytes(&mut archive, &name);
                (name, bytes)
            })
            .collect()
    };

    let first = entries(&first_out);
    let second = entries(&second_out);
    assert_eq!(
        first.keys().collect::<std::collections::BTreeSet<_>>(),
        second.keys().collect::<std::collections::BTreeSet<_>>()
    );

    // The book identifier is freshly generated per run; everything else must
    // be byte-identical.
    let uuid = regex::Regex::new(r"urn:uuid:[0-9a-fA-F-]{36}").unwrap();
    for (name, bytes) in &first {
        let other = &second[name];
        if name.ends_with(".opf") || name.ends_with(".ncx") {
            let a = uuid.replace_all(std::str::from_utf8(bytes).unwrap(), "urn:uuid:X");
            let b = uuid.replace_all(std::str::from_utf8(other).unwrap(), "urn:uuid:X");
            assert_eq!(a, b, "entry {name} differs beyond the identifier");
        } else {
            assert_eq!(bytes, other, "entry {name} differs");
        }
    }
}
