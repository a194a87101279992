use std::fs;
use std::path::{Path, PathBuf};

/// Only the router submits orders; gateways implement and wrap the call.
const ALLOWED_PLACE_ORDER_CALLERS: &[&str] = &["src/engine/router.rs"];
const ALLOWED_PLACE_ORDER_DIRS: &[&str] = &["src/exchange/"];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

#[test]
fn place_order_calls_are_limited_to_router_and_gateways() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let src_root = repo_root.join("src");
    let mut files = Vec::new();
    collect_rust_files(&src_root, &mut files);
    assert!(!files.is_empty(), "no sources found under {}", src_root.display());

    let mut offenders = Vec::new();
    for file in files {
        let rel = file
            .strip_prefix(repo_root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        if ALLOWED_PLACE_ORDER_CALLERS.iter().any(|allowed| *allowed == rel)
            || ALLOWED_PLACE_ORDER_DIRS.iter().any(|dir| rel.starts_with(dir))
        {
            continue;
        }
        let content = fs::read_to_string(&file).unwrap_or_default();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("//") {
                continue;
            }
            if trimmed.contains("place_order(") {
                offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "direct place_order path detected outside the order router:\n{}",
        offenders.join("\n")
    );
}

#[test]
fn strategies_do_not_touch_the_gateway() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src/strategy"), &mut files);

    let offenders: Vec<String> = files
        .iter()
        .filter(|file| {
            fs::read_to_string(file)
                .unwrap_or_default()
                .contains("BrokerGateway")
        })
        .map(|file| file.display().to_string())
        .collect();

    assert!(
        offenders.is_empty(),
        "strategy code must route through SignalSink:\n{}",
        offenders.join("\n")
    );
}
