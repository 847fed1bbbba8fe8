//! Normalization of host workflow JSON into a [`Scene`].
//!
//! This is the only place that knows about the alternative shapes the host
//! serializer emits. Live widget state reported by the running editor is merged
//! over the serialized values here as well.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    Group, Link, MediaKind, MediaRef, Node, NodeId, NodeMode, Scene, Slot, Widget,
    DEFAULT_NODE_SIZE,
};
use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::raster::Rgba;

/// Top-level workflow keys kept when embedding.
const EMBED_KEYS: [&str; 7] = [
    "last_node_id",
    "last_link_id",
    "nodes",
    "links",
    "groups",
    "config",
    "version",
];

const TEXT_NODE_HINTS: [&str; 5] = ["note", "text", "prompt", "string", "markdown"];
const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "webm", "mov", "mkv", "avi", "gif"];
const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// Widget state reported by the live editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveWidget {
    /// Widget name
    pub name: String,
    /// Current value
    pub value: Value,
    /// Whether the host renders it as a multi-line text area
    pub multiline: Option<bool>,
    /// Body-relative top
    pub y: Option<f32>,
    /// Height
    pub height: Option<f32>,
}

/// Live state of one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveNode {
    /// Widgets in display order
    pub widgets: Vec<LiveWidget>,
    /// Current `widgets_values` (list or map)
    pub widgets_values: Option<Value>,
    /// Offset of the first widget
    pub widgets_start_y: Option<f32>,
}

/// Live editor state keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveState {
    /// Per-node live state
    pub nodes: HashMap<NodeId, LiveNode>,
}

/// Read-only scene input: serialized workflow plus optional live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    /// Serialized workflow JSON
    pub workflow: Value,
    /// Live editor state
    #[serde(default)]
    pub live: LiveState,
}

impl SceneSnapshot {
    /// Snapshot of a serialized workflow with no live state.
    pub fn new(workflow: Value) -> Self {
        Self {
            workflow,
            live: LiveState::default(),
        }
    }

    /// Parse a workflow JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let workflow: Value = serde_json::from_str(json)
            .map_err(|e| Error::InvalidScene(format!("workflow JSON parse failed: {}", e)))?;
        Ok(Self::new(workflow))
    }

    /// Attach live editor state.
    pub fn with_live(mut self, live: LiveState) -> Self {
        self.live = live;
        self
    }
}

/// Build a [`Scene`] from a snapshot.
pub fn normalize(snapshot: &SceneSnapshot) -> Result<Scene> {
    let workflow = snapshot
        .workflow
        .as_object()
        .ok_or_else(|| Error::InvalidScene("workflow is not a JSON object".to_string()))?;
    let raw_nodes = workflow
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidScene("workflow has no nodes array".to_string()))?;

    let mut nodes = Vec::with_capacity(raw_nodes.len());
    for raw in raw_nodes {
        let Some(obj) = raw.as_object() else {
            continue;
        };
        let Some(mut node) = parse_node(obj) else {
            log::debug!("skipping node without a usable id");
            continue;
        };
        if let Some(live) = snapshot.live.nodes.get(&node.id) {
            merge_live(&mut node, live);
        }
        nodes.push(node);
    }

    let groups: Vec<Group> = workflow
        .get("groups")
        .and_then(Value::as_array)
        .map(|gs| gs.iter().filter_map(Value::as_object).filter_map(parse_group).collect())
        .unwrap_or_default();

    let links: Vec<Link> = match workflow.get("links") {
        Some(Value::Array(items)) => items.iter().filter_map(parse_link).collect(),
        Some(Value::Object(map)) => map.values().filter_map(parse_link).collect(),
        _ => Vec::new(),
    };

    log::debug!(
        "normalized scene: {} nodes, {} groups, {} links",
        nodes.len(),
        groups.len(),
        links.len()
    );
    Ok(Scene {
        nodes,
        groups,
        links,
    })
}

/// Workflow JSON reduced to the keys needed to reload it.
///
/// Falls back to the unmodified document when `nodes` or `links` is not an array.
pub fn sanitize_workflow(raw: &Value) -> Result<String> {
    let Some(obj) = raw.as_object() else {
        return Ok(serde_json::to_string(raw)?);
    };
    let cleaned: Map<String, Value> = EMBED_KEYS
        .iter()
        .filter_map(|k| obj.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();

    let nodes_ok = cleaned.get("nodes").is_some_and(Value::is_array);
    let links_ok = cleaned.get("links").is_some_and(Value::is_array);
    if !nodes_ok || !links_ok {
        return Ok(serde_json::to_string(raw)?);
    }
    Ok(serde_json::to_string(&Value::Object(cleaned))?)
}

fn number(v: &Value) -> Option<f32> {
    let f = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (f.is_finite()).then_some(f as f32)
}

fn id_of(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A coordinate pair given as `[a, b]`, `{"0": a, "1": b}` or named keys.
fn pair(v: &Value, first: &[&str], second: &[&str]) -> Option<(f32, f32)> {
    match v {
        Value::Array(items) if items.len() >= 2 => Some((number(&items[0])?, number(&items[1])?)),
        Value::Object(map) => {
            let pick = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k)).and_then(number);
            Some((pick(first)?, pick(second)?))
        },
        _ => None,
    }
}

fn parse_pos(v: Option<&Value>) -> Option<(f32, f32)> {
    pair(v?, &["0", "x"], &["1", "y"])
}

fn parse_size(v: Option<&Value>) -> (f32, f32) {
    v.and_then(|v| pair(v, &["0", "width", "w"], &["1", "height", "h"]))
        .filter(|(w, h)| *w > 0.0 && *h > 0.0)
        .unwrap_or(DEFAULT_NODE_SIZE)
}

fn color(v: Option<&Value>) -> Option<Rgba> {
    v.and_then(Value::as_str).and_then(Rgba::parse)
}

fn string(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str).map(str::to_string)
}

fn parse_slots(v: Option<&Value>) -> Vec<Slot> {
    v.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|s| Slot {
                    name: string(s.get("label"))
                        .or_else(|| string(s.get("name")))
                        .unwrap_or_default(),
                    kind: s
                        .get("type")
                        .map(|t| match t {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_node(obj: &Map<String, Value>) -> Option<Node> {
    let id = obj.get("id").and_then(id_of)?;
    let kind = string(obj.get("type")).unwrap_or_default();
    let title = string(obj.get("title")).unwrap_or_else(|| kind.clone());

    let geometry = parse_pos(obj.get("pos")).map(|(x, y)| {
        let (w, h) = parse_size(obj.get("size"));
        Rect::new(x, y, w, h)
    });

    let collapsed = obj
        .get("flags")
        .and_then(|f| f.get("collapsed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mode = match obj.get("mode").and_then(Value::as_i64) {
        Some(2) => NodeMode::Muted,
        Some(4) => NodeMode::Bypassed,
        _ => NodeMode::Always,
    };

    let widgets = obj
        .get("widgets_values")
        .map(|values| widgets_from_values(&kind, values))
        .unwrap_or_default();

    let mut node = Node {
        id,
        title,
        kind,
        geometry,
        collapsed,
        color: color(obj.get("color")),
        bgcolor: color(obj.get("bgcolor")),
        mode,
        inputs: parse_slots(obj.get("inputs")),
        outputs: parse_slots(obj.get("outputs")),
        widgets,
        widgets_start_y: obj.get("widgets_start_y").and_then(number),
        media: None,
    };
    node.media = extract_media(&node, obj.get("properties"), obj.get("widgets_values"));
    Some(node)
}

fn looks_multiline(node_kind: &str, name: &str, value: &Value) -> bool {
    let Some(s) = value.as_str() else {
        return false;
    };
    let kind = node_kind.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();
    s.contains('\n')
        || s.chars().count() > 40
        || TEXT_NODE_HINTS.iter().any(|h| kind.contains(h))
        || TEXT_NODE_HINTS.iter().any(|h| name == *h)
}

fn widgets_from_values(node_kind: &str, values: &Value) -> Vec<Widget> {
    let make = |name: String, value: &Value| Widget {
        multiline: looks_multiline(node_kind, &name, value),
        name,
        value: value.clone(),
        y: None,
        height: None,
    };
    match values {
        Value::Array(items) => items.iter().map(|v| make(String::new(), v)).collect(),
        Value::Object(map) => map.iter().map(|(k, v)| make(k.clone(), v)).collect(),
        _ => Vec::new(),
    }
}

fn merge_live(node: &mut Node, live: &LiveNode) {
    if let Some(start) = live.widgets_start_y.filter(|v| v.is_finite()) {
        node.widgets_start_y = Some(start);
    }

    if live.widgets.is_empty() {
        if let Some(values) = &live.widgets_values {
            node.widgets = widgets_from_values(&node.kind, values);
        }
        return;
    }

    let fallback = |index: usize, name: &str| -> Option<Value> {
        match live.widgets_values.as_ref()? {
            Value::Array(items) => items.get(index).cloned(),
            Value::Object(map) => map
                .get(name)
                .or_else(|| map.values().nth(index))
                .cloned(),
            _ => None,
        }
    };

    node.widgets = live
        .widgets
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let value = if w.value.is_null() {
                fallback(i, &w.name).unwrap_or(Value::Null)
            } else {
                w.value.clone()
            };
            let multiline = w
                .multiline
                .unwrap_or_else(|| looks_multiline(&node.kind, &w.name, &value));
            Widget {
                name: w.name.clone(),
                value,
                multiline,
                y: w.y.filter(|v| v.is_finite()),
                height: w.height.filter(|v| v.is_finite()),
            }
        })
        .collect();
}

fn parse_group(obj: &Map<String, Value>) -> Option<Group> {
    let rect = match obj.get("bounding").and_then(Value::as_array) {
        Some(b) if b.len() >= 4 => Rect::new(
            number(&b[0])?,
            number(&b[1])?,
            number(&b[2])?,
            number(&b[3])?,
        ),
        _ => {
            let (x, y) = parse_pos(obj.get("pos"))?;
            let (w, h) = parse_size(obj.get("size"));
            Rect::new(x, y, w, h)
        },
    };
    Some(Group {
        title: string(obj.get("title")).unwrap_or_default(),
        rect,
        color: color(obj.get("color")),
        font_size: obj.get("font_size").and_then(number).unwrap_or(24.0),
    })
}

fn parse_link(v: &Value) -> Option<Link> {
    let slot = |v: &Value| id_of(v).filter(|s| *s >= 0).map(|s| s as usize);
    let kind = |v: Option<&Value>| match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    match v {
        Value::Array(items) if items.len() >= 5 => Some(Link {
            id: id_of(&items[0])?,
            origin_id: id_of(&items[1])?,
            origin_slot: slot(&items[2])?,
            target_id: id_of(&items[3])?,
            target_slot: slot(&items[4])?,
            kind: kind(items.get(5)),
        }),
        Value::Object(map) => {
            let field = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k));
            Some(Link {
                id: field(&["id"]).and_then(id_of).unwrap_or(-1),
                origin_id: field(&["origin_id", "from_id", "originId", "fromId"]).and_then(id_of)?,
                origin_slot: field(&["origin_slot", "from_slot", "originSlot"])
                    .and_then(slot)
                    .unwrap_or(0),
                target_id: field(&["target_id", "to_id", "targetId", "toId"]).and_then(id_of)?,
                target_slot: field(&["target_slot", "to_slot", "targetSlot"])
                    .and_then(slot)
                    .unwrap_or(0),
                kind: kind(field(&["type"])),
            })
        },
        _ => None,
    }
}

fn extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn looks_like_video(name: &str) -> bool {
    extension(name).is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

fn looks_like_image(name: &str) -> bool {
    extension(name).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

fn looks_like_filename(value: &str) -> bool {
    let t = value.trim();
    t.len() > 4
        && !t.chars().any(char::is_whitespace)
        && t.contains('.')
        && t.parse::<f64>().is_err()
}

#[derive(Debug)]
struct FileRef {
    filename: String,
    subfolder: Option<String>,
    folder: Option<String>,
}

/// Find a `{filename, subfolder, type}`-like record up to two levels deep.
fn file_ref_in_object(v: &Value, depth: usize) -> Option<FileRef> {
    let obj = v.as_object()?;
    let direct = ["filename", "file", "name", "video"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .or_else(|| {
            obj.get("filenames")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(Value::as_str)
        });
    if let Some(filename) = direct {
        return Some(FileRef {
            filename: filename.to_string(),
            subfolder: string(obj.get("subfolder")).or_else(|| string(obj.get("folder"))),
            folder: string(obj.get("type")),
        });
    }
    if depth >= 2 {
        return None;
    }
    obj.values().find_map(|nested| file_ref_in_object(nested, depth + 1))
}

fn extract_file_ref(
    node: &Node,
    properties: Option<&Value>,
    values: Option<&Value>,
) -> Option<FileRef> {
    let video_like = {
        let text = format!("{} {}", node.title, node.kind).to_ascii_lowercase();
        text.contains("video") || text.contains("vhs")
    };
    let props = properties.and_then(Value::as_object);
    let with_props = |filename: &str| FileRef {
        filename: filename.to_string(),
        subfolder: props.and_then(|p| string(p.get("subfolder"))),
        folder: props.and_then(|p| string(p.get("type"))),
    };

    if let Some(p) = properties {
        if let Some(found) = file_ref_in_object(p, 0) {
            return Some(found);
        }
        if let Some(map) = props {
            for value in map.values() {
                if let Some(s) = value.as_str().filter(|s| looks_like_video(s)) {
                    return Some(with_props(s));
                }
            }
        }
    }

    match values? {
        Value::Array(items) => items.iter().find_map(|value| match value {
            Value::String(s) if looks_like_video(s) || looks_like_filename(s) => {
                Some(with_props(s))
            },
            Value::Object(map) => file_ref_in_object(value, 0).or_else(|| {
                map.values().find_map(|sub| match sub {
                    Value::String(s) if looks_like_video(s) || looks_like_filename(s) => {
                        Some(with_props(s))
                    },
                    other => file_ref_in_object(other, 1),
                })
            }),
            _ => None,
        }),
        Value::Object(map) => map.iter().find_map(|(key, value)| {
            if let Some(found) = file_ref_in_object(value, 0) {
                return Some(found);
            }
            let s = value.as_str()?;
            let key = key.to_ascii_lowercase();
            let keyed = ["video", "file", "name", "preview"]
                .iter()
                .any(|k| key.contains(k));
            (looks_like_video(s) || (video_like && keyed && looks_like_filename(s)))
                .then(|| with_props(s))
        }),
        _ => None,
    }
}

fn extract_media(
    node: &Node,
    properties: Option<&Value>,
    values: Option<&Value>,
) -> Option<MediaRef> {
    let found = extract_file_ref(node, properties, values)?;
    let text = format!("{} {}", node.title, node.kind).to_ascii_lowercase();
    let video_node = text.contains("video") || text.contains("vhs");

    let is_video = looks_like_video(&found.filename);
    let kind = if is_video && (video_node || !looks_like_image(&found.filename)) {
        MediaKind::Video
    } else if looks_like_image(&found.filename) {
        MediaKind::Image
    } else if video_node && looks_like_filename(&found.filename) {
        MediaKind::Video
    } else {
        return None;
    };

    Some(MediaRef {
        filename: found.filename,
        subfolder: found.subfolder,
        folder: found.folder.unwrap_or_else(|| "input".to_string()),
        kind,
    })
}
