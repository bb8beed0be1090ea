//! Automation script handed to Blender with `--python`.
//!
//! The script waits for a usable window, imports the configured area through
//! the addon's UI operators, exports it again, and falls back to the addon's
//! scene manager when the export operator raises. Progress is reported with
//! marker lines understood by [`crate::roundtrip`]. Blender is told to quit on
//! every path.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::config::HarnessConfig;
use crate::error::RtResult;
use crate::roundtrip::MARKER_PREFIX;

const TEMPLATE: &str = r#"# Generated by arx_roundtrip. Do not edit; regenerated on every run.
import bpy
import importlib
import os
import sys
import time
import traceback

LEVEL_ID = @LEVEL_ID@
SCENE_NAME = @SCENE_NAME@
WORKING_FILE = @WORKING_FILE@
ASSET_ROOT = @ASSET_ROOT@
ADDON_MODULE = @ADDON_MODULE@
IMPORT_OPERATOR = @IMPORT_OPERATOR@
EXPORT_OPERATOR = @EXPORT_OPERATOR@
POLL_INTERVAL = @POLL_INTERVAL@
READY_TIMEOUT = @READY_TIMEOUT@
MARKER = @MARKER@

_started = time.monotonic()


def mark(event, detail=""):
    line = MARKER + " " + event
    if detail:
        line += " " + " ".join(str(detail).split())
    print(line, flush=True)


def find_operator(dotted):
    category, name = dotted.split(".", 1)
    return getattr(getattr(bpy.ops, category), name)


def ui_override():
    wm = bpy.context.window_manager
    if wm is None:
        return None
    for window in wm.windows:
        screen = window.screen
        if screen is None:
            continue
        for area in screen.areas:
            if area.type in ("PROPERTIES", "VIEW_3D"):
                return {"window": window, "screen": screen, "area": area}
        return {"window": window, "screen": screen}
    return None


def run_operator(dotted, override):
    operator = find_operator(dotted)
    with bpy.context.temp_override(**override):
        result = operator("INVOKE_DEFAULT")
    if "FINISHED" not in result:
        raise RuntimeError("%s returned %s" % (dotted, sorted(result)))


def select_area(override):
    wm = bpy.context.window_manager
    with bpy.context.temp_override(**override):
        bpy.ops.arx.arx_area_list_reload("INVOKE_DEFAULT")
    for index, item in enumerate(wm.arx_areas_col):
        if item.area_id == LEVEL_ID:
            wm.arx_areas_idx = index
            return
    raise KeyError("area %d is not in the area list" % LEVEL_ID)


def activate_scene(override):
    scene = bpy.data.scenes.get(SCENE_NAME)
    if scene is None:
        raise KeyError("import did not create scene %s" % SCENE_NAME)
    override["window"].scene = scene
    return scene


def direct_export(scene):
    managers = importlib.import_module(ADDON_MODULE + ".managers")
    manager = managers.getAddon(bpy.context).sceneManager
    if hasattr(manager, "exportScene"):
        manager.exportScene(bpy.context, scene, LEVEL_ID, WORKING_FILE)
        return
    serializer = manager.ftsSerializer
    data = serializer.read_fts_container(WORKING_FILE)
    serializer.write_fts_container(WORKING_FILE, data, updated_cells=None)


def round_trip(override):
    mark("import_begin", SCENE_NAME)
    try:
        prefs = bpy.context.preferences.addons[ADDON_MODULE].preferences
        prefs.arxAssetPath = ASSET_ROOT
        select_area(override)
        run_operator(IMPORT_OPERATOR, override)
        scene = activate_scene(override)
    except Exception as exc:
        traceback.print_exc()
        mark("import_failed", repr(exc))
        return
    mark("import_ok", "%d objects" % len(scene.objects))

    mark("export_begin", WORKING_FILE)
    try:
        run_operator(EXPORT_OPERATOR, override)
    except Exception as exc:
        traceback.print_exc()
        mark("export_failed", repr(exc))
    else:
        mark("export_ok")
        return

    mark("fallback_begin")
    try:
        direct_export(scene)
    except Exception as exc:
        traceback.print_exc()
        mark("fallback_failed", repr(exc))
    else:
        mark("fallback_ok")


def quit_tool():
    mark("quit")
    sys.stdout.flush()
    sys.stderr.flush()
    try:
        bpy.ops.wm.quit_blender()
    except Exception:
        traceback.print_exc()
        os._exit(0)


def poll():
    override = ui_override()
    if override is None:
        if time.monotonic() - _started >= READY_TIMEOUT:
            mark("ready_timeout", "no window after %.1fs" % READY_TIMEOUT)
            quit_tool()
            return None
        return POLL_INTERVAL
    mark("ready")
    try:
        round_trip(override)
    except Exception:
        traceback.print_exc()
    finally:
        quit_tool()
    return None


bpy.app.timers.register(poll, first_interval=POLL_INTERVAL)
"#;

/// Render the automation script for `config`.
///
/// String values are embedded as JSON string literals, which Python parses
/// identically, so paths with quotes or backslashes stay intact. Every
/// `@NAME@` token is replaced exactly once; substituted text is never
/// scanned again.
pub fn render(config: &HarnessConfig) -> RtResult<String> {
    let quote = |value: &str| serde_json::to_string(value);
    let values = [
        ("LEVEL_ID", config.level_id.to_string()),
        ("SCENE_NAME", quote(&config.scene_name)?),
        (
            "WORKING_FILE",
            quote(config.working_file.to_string_lossy().as_ref())?,
        ),
        (
            "ASSET_ROOT",
            quote(config.asset_root.to_string_lossy().as_ref())?,
        ),
        ("ADDON_MODULE", quote(&config.addon_module)?),
        ("IMPORT_OPERATOR", quote(&config.import_operator)?),
        ("EXPORT_OPERATOR", quote(&config.export_operator)?),
        (
            "POLL_INTERVAL",
            format!("{:.3}", config.ready_poll.as_secs_f64()),
        ),
        (
            "READY_TIMEOUT",
            format!("{:.3}", config.ready_timeout.as_secs_f64()),
        ),
        ("MARKER", quote(MARKER_PREFIX)?),
    ];
    Ok(substitute(TEMPLATE, &values))
}

fn substitute(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len() + 512);
    let mut rest = template;
    while let Some(start) = rest.find('@') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let token = after.find('@').and_then(|end| {
            values
                .iter()
                .find(|(name, _)| *name == &after[..end])
                .map(|(_, value)| (end, value))
        });
        match token {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('@');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Write `source` to a temporary `.py` file that lives as long as the handle.
pub fn write_temp(source: &str) -> RtResult<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("arx_roundtrip_")
        .suffix(".py")
        .tempfile()?;
    file.write_all(source.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Blender command line: configured extra args, then the script.
#[must_use]
pub fn blender_args(config: &HarnessConfig, script: &Path) -> Vec<String> {
    let mut args = config.blender_args.clone();
    args.push("--python".to_owned());
    args.push(script.to_string_lossy().into_owned());
    args
}
