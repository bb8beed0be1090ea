#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};

use arx_roundtrip::{ConfigLayer, HarnessConfig};
use tempfile::TempDir;

/// Byte layout of a small but well-formed level container.
pub fn level_container(uncompressed_size: i32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut path = vec![0u8; 256];
    let name = b"C:\\ARX\\Game\\Graph\\Levels\\Level1\\fast.fts";
    path[..name.len()].copy_from_slice(name);
    out.extend_from_slice(&path);
    out.extend_from_slice(&2i32.to_le_bytes());
    out.extend_from_slice(&0.141f32.to_le_bytes());
    out.extend_from_slice(&uncompressed_size.to_le_bytes());
    out.extend_from_slice(&[0u8; 12]);
    for name in [&b"level1.dlf"[..], &b"level1.llf"[..]] {
        let mut header = vec![0u8; 768];
        header[..name.len()].copy_from_slice(name);
        out.extend_from_slice(&header);
    }
    out.extend_from_slice(payload);
    out
}

/// Markers a well-behaved Blender run prints when the UI export works.
pub const UI_EXPORT_MARKERS: &[&str] = &[
    "ready",
    "import_begin Area_01",
    "import_ok 412 objects",
    "export_begin",
    "export_ok",
    "quit",
];

/// Markers for a run where the export operator raised and the direct
/// serializer took over.
pub const FALLBACK_MARKERS: &[&str] = &[
    "ready",
    "import_begin Area_01",
    "import_ok 412 objects",
    "export_begin",
    "export_failed RuntimeError('context is incorrect')",
    "fallback_begin",
    "fallback_ok",
    "quit",
];

/// A throwaway directory laid out like a developer machine: fixture, asset
/// root with the working file location, a Blender symlink and an arx binary,
/// both replaced by shell stubs.
pub struct Sandbox {
    pub dir: TempDir,
    pub fixture: PathBuf,
    pub asset_root: PathBuf,
    pub working_file: PathBuf,
    pub blender: PathBuf,
    pub arx: PathBuf,
    pub log: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();

        let fixture = root.join("level-backup").join("fast.fts");
        fs::create_dir_all(fixture.parent().unwrap()).unwrap();
        fs::write(&fixture, level_container(120_000, &[0x5A; 96])).unwrap();

        let asset_root = root.join("arx-data");
        let working_file = asset_root.join("game/graph/levels/level1/fast.fts");
        fs::create_dir_all(working_file.parent().unwrap()).unwrap();

        let tools = root.join("tools");
        fs::create_dir_all(&tools).unwrap();

        let sandbox = Self {
            fixture,
            working_file,
            asset_root,
            blender: tools.join("blender"),
            arx: tools.join("arx"),
            log: root.join("logs").join("roundtrip.log"),
            dir,
        };
        sandbox.install_blender(&marker_script(UI_EXPORT_MARKERS));
        sandbox.install_arx("echo \"arx: loading level $2\"\nexit 0");
        sandbox
    }

    /// Replace the Blender stub. The stub sits behind a symlink like a real
    /// versioned install would.
    pub fn install_blender(&self, body: &str) {
        let real = self.dir.path().join("tools").join("blender-4.4-stub");
        write_executable(&real, body);
        if fs::symlink_metadata(&self.blender).is_ok() {
            fs::remove_file(&self.blender).unwrap();
        }
        symlink(&real, &self.blender).unwrap();
    }

    pub fn install_arx(&self, body: &str) {
        write_executable(&self.arx, body);
    }

    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            fixture: Some(self.fixture.clone()),
            working_file: Some(self.working_file.clone()),
            asset_root: Some(self.asset_root.clone()),
            blender: Some(self.blender.clone()),
            arx_binary: Some(self.arx.clone()),
            log: Some(self.log.clone()),
            ready_poll_ms: Some(50),
            ready_timeout_secs: Some(1),
            tool_timeout_secs: Some(10),
            arx_timeout_secs: Some(10),
            ..ConfigLayer::default()
        }
    }

    pub fn config(&self) -> HarnessConfig {
        HarnessConfig::resolve(self.layer()).expect("sandbox config is valid")
    }

    pub fn log_text(&self) -> String {
        fs::read_to_string(&self.log).expect("log readable")
    }
}

/// Shell body that prints the given markers, one per line.
pub fn marker_script(events: &[&str]) -> String {
    events
        .iter()
        .map(|event| format!("echo \"ARX_ROUNDTRIP {event}\""))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn write_executable(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}
