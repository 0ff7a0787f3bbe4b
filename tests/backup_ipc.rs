mod test_support;

use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn workspace_bundle_restores_into_another_workspace() {
    let source = temp_dir("classbook-backup-ipc-src");
    let target = temp_dir("classbook-backup-ipc-dst");
    let bundle = temp_dir("classbook-backup-ipc-out").join("export.classbook.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let s = &mut stdin;
    let r = &mut reader;

    request_ok(s, r, "1", "workspace.select", json!({ "path": source.to_string_lossy() }));
    request_ok(s, r, "2", "courses.create", json!({ "name": "History", "kind": "class" }));
    let export = request_ok(
        s,
        r,
        "3",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"], "classbook-workspace-v1");
    assert_eq!(export["entryCount"], 3);

    request_ok(s, r, "4", "workspace.select", json!({ "path": target.to_string_lossy() }));
    let empty = request_ok(s, r, "5", "courses.list", json!({}));
    assert_eq!(empty["courses"], json!([]));

    let import = request_ok(
        s,
        r,
        "6",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(import["bundleFormatDetected"], "classbook-workspace-v1");
    assert_eq!(import["bundleId"], export["bundleId"]);

    let restored = request_ok(s, r, "7", "courses.list", json!({}));
    let courses = restored["courses"].as_array().expect("courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["name"], "History");

    let missing = request(
        s,
        r,
        "8",
        "backup.importWorkspaceBundle",
        json!({ "inPath": target.join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing["error"]["code"], "not_found");
    // The workspace stays usable.
    request_ok(s, r, "9", "courses.list", json!({}));

    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(target);
}
