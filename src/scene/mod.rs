//! Strict scene model consumed by the renderer and overlay compositor.
//!
//! Host workflow JSON is loosely typed (positions as arrays or objects, links
//! as tuples or records, widget values as lists or maps). [`adapter`] resolves
//! all of that once; everything downstream works on these types only.

pub mod adapter;

use std::collections::HashSet;

use serde_json::Value;

use crate::config::RenderFilter;
use crate::geometry::{Point, Rect};
use crate::raster::Rgba;

pub use adapter::{normalize, sanitize_workflow, LiveNode, LiveState, LiveWidget, SceneSnapshot};

/// Node identifier as used by the host graph.
pub type NodeId = i64;

/// Height of a node title bar in graph units.
pub const NODE_TITLE_HEIGHT: f32 = 30.0;
/// Height of one widget row.
pub const NODE_WIDGET_HEIGHT: f32 = 20.0;
/// Vertical pitch of input/output slots.
pub const NODE_SLOT_HEIGHT: f32 = 20.0;
/// Size assumed for nodes whose size is missing or invalid.
pub const DEFAULT_NODE_SIZE: (f32, f32) = (240.0, 120.0);

/// Execution mode, which changes how a node is tinted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeMode {
    /// Normal node
    #[default]
    Always,
    /// Muted ("never")
    Muted,
    /// Bypassed
    Bypassed,
}

/// An input or output slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Slot {
    /// Slot label
    pub name: String,
    /// Data type, used for link colours
    pub kind: String,
}

/// A widget row.
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    /// Widget name (may be empty when only values were serialized)
    pub name: String,
    /// Current value
    pub value: Value,
    /// Multi-line text widget drawn by the host DOM, not the canvas
    pub multiline: bool,
    /// Top of the widget relative to the node body, if known
    pub y: Option<f32>,
    /// Widget height, if known
    pub height: Option<f32>,
}

impl Widget {
    /// Value formatted for a single-line widget row.
    pub fn display_value(&self) -> String {
        match &self.value {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() != 0.0 => format!("{:.3}", f)
                    .trim_end_matches('0')
                    .trim_end_matches('.')
                    .to_string(),
                _ => n.to_string(),
            },
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Text content for multi-line widgets.
    pub fn text(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Kind of media a node previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Still image
    Image,
    /// Video; a single frame is used
    Video,
}

/// A file a node displays as its preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// File name
    pub filename: String,
    /// Sub-folder below the media root
    pub subfolder: Option<String>,
    /// Host folder kind ("input", "output", "temp")
    pub folder: String,
    /// Image or video
    pub kind: MediaKind,
}

impl MediaRef {
    /// Path relative to the media root: `<folder>/<subfolder>/<filename>`.
    pub fn relative_path(&self) -> std::path::PathBuf {
        let mut path = std::path::PathBuf::from(&self.folder);
        if let Some(sub) = self.subfolder.as_deref().filter(|s| !s.is_empty()) {
            path.push(sub);
        }
        path.push(&self.filename);
        path
    }
}

/// A graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node id
    pub id: NodeId,
    /// Title shown in the title bar
    pub title: String,
    /// Node type name
    pub kind: String,
    /// Body rectangle (below the title bar); `None` if the position was unusable
    pub geometry: Option<Rect>,
    /// Drawn as a title-only pill
    pub collapsed: bool,
    /// Title bar colour
    pub color: Option<Rgba>,
    /// Body colour
    pub bgcolor: Option<Rgba>,
    /// Execution mode
    pub mode: NodeMode,
    /// Input slots
    pub inputs: Vec<Slot>,
    /// Output slots
    pub outputs: Vec<Slot>,
    /// Widget rows
    pub widgets: Vec<Widget>,
    /// Offset of the first widget from the body top, if the host reported one
    pub widgets_start_y: Option<f32>,
    /// Preview media
    pub media: Option<MediaRef>,
}

impl Node {
    /// Body rectangle extended upward by the title bar; collapsed nodes are
    /// only as wide as their pill.
    pub fn bounding(&self) -> Option<Rect> {
        let body = self.geometry?;
        if self.collapsed {
            return Some(Rect::new(
                body.x,
                body.y - NODE_TITLE_HEIGHT,
                self.collapsed_width(),
                NODE_TITLE_HEIGHT,
            ));
        }
        Some(Rect::new(
            body.x,
            body.y - NODE_TITLE_HEIGHT,
            body.width,
            body.height + NODE_TITLE_HEIGHT,
        ))
    }

    /// Width of the collapsed pill.
    pub fn collapsed_width(&self) -> f32 {
        let text = self.title.chars().count() as f32 * 7.0;
        (text + NODE_TITLE_HEIGHT * 2.0).max(80.0)
    }

    /// Graph position of input slot `index`.
    pub fn input_pos(&self, index: usize) -> Option<Point> {
        let body = self.geometry?;
        if self.collapsed {
            return Some(Point::new(body.x, body.y - NODE_TITLE_HEIGHT * 0.5));
        }
        Some(Point::new(
            body.x + NODE_SLOT_HEIGHT * 0.5,
            body.y + (index as f32 + 0.7) * NODE_SLOT_HEIGHT,
        ))
    }

    /// Graph position of output slot `index`.
    pub fn output_pos(&self, index: usize) -> Option<Point> {
        let body = self.geometry?;
        if self.collapsed {
            return Some(Point::new(
                body.x + self.collapsed_width(),
                body.y - NODE_TITLE_HEIGHT * 0.5,
            ));
        }
        Some(Point::new(
            body.right() - NODE_SLOT_HEIGHT * 0.5,
            body.y + (index as f32 + 0.7) * NODE_SLOT_HEIGHT,
        ))
    }

    /// Offset of the first widget row from the body top.
    pub fn widget_start(&self) -> f32 {
        self.widgets_start_y.unwrap_or_else(|| {
            let slots = self.inputs.len().max(self.outputs.len()) as f32;
            slots * NODE_SLOT_HEIGHT + 4.0
        })
    }

    /// Body-relative `(top, height)` of each widget.
    pub fn widget_rows(&self) -> Vec<(f32, f32)> {
        let mut next = self.widget_start();
        self.widgets
            .iter()
            .map(|w| {
                let top = w.y.unwrap_or(next);
                let height = w.height.filter(|h| *h > 0.0).unwrap_or(NODE_WIDGET_HEIGHT);
                next = top + height + 4.0;
                (top, height)
            })
            .collect()
    }

    /// Graph rectangle of widget `index`.
    pub fn widget_rect(&self, index: usize) -> Option<Rect> {
        let body = self.geometry?;
        let (top, height) = *self.widget_rows().get(index)?;
        Some(Rect::new(body.x + 15.0, body.y + top, body.width - 30.0, height))
    }

    /// Area below the widgets where preview media is drawn.
    ///
    /// Returns `None` when less than 4 units remain in either direction.
    pub fn preview_rect(&self) -> Option<Rect> {
        const PAD_X: f32 = 1.0;
        const PAD_Y: f32 = 2.0;

        let body = self.geometry?;
        if self.collapsed {
            return None;
        }
        let widget_bottom = if self.widgets.is_empty() {
            self.widgets_start_y.unwrap_or(NODE_TITLE_HEIGHT).max(NODE_TITLE_HEIGHT)
        } else {
            self.widget_rows()
                .iter()
                .fold(self.widgets_start_y.unwrap_or(NODE_TITLE_HEIGHT), |acc, (top, h)| {
                    acc.max(top + h + 4.0)
                })
        };

        let width = body.width - PAD_X * 2.0;
        let height = body.height - widget_bottom - PAD_Y;
        if width <= 4.0 || height <= 4.0 {
            return None;
        }
        Some(Rect::new(body.x + PAD_X, body.y + widget_bottom, width, height))
    }
}

/// A node group.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Group title
    pub title: String,
    /// Full group rectangle, title band included
    pub rect: Rect,
    /// Group colour
    pub color: Option<Rgba>,
    /// Title font size
    pub font_size: f32,
}

/// A link between an output slot and an input slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Link id
    pub id: i64,
    /// Source node
    pub origin_id: NodeId,
    /// Source output index
    pub origin_slot: usize,
    /// Destination node
    pub target_id: NodeId,
    /// Destination input index
    pub target_slot: usize,
    /// Data type
    pub kind: String,
}

/// A normalized scene.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scene {
    /// Nodes in draw order
    pub nodes: Vec<Node>,
    /// Groups in draw order
    pub groups: Vec<Group>,
    /// Links
    pub links: Vec<Link>,
}

impl Scene {
    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Rectangles that define the export extent.
    ///
    /// With a selection only the selected nodes count; otherwise every node and
    /// group does.
    pub fn entity_rects(&self, selection: Option<&HashSet<NodeId>>) -> Vec<Option<Rect>> {
        match selection.filter(|s| !s.is_empty()) {
            Some(ids) => self
                .nodes
                .iter()
                .filter(|n| ids.contains(&n.id))
                .map(Node::bounding)
                .collect(),
            None => self
                .nodes
                .iter()
                .map(Node::bounding)
                .chain(self.groups.iter().map(|g| Some(g.rect)))
                .collect(),
        }
    }

    /// Working copy with the node and link filters applied.
    ///
    /// An empty selection disables filtering. Links whose endpoints were
    /// removed by the node filter are dropped too.
    pub fn filtered(
        &self,
        selected: &HashSet<NodeId>,
        nodes: RenderFilter,
        links: RenderFilter,
    ) -> Scene {
        if selected.is_empty() {
            return self.clone();
        }

        let keep_node = |n: &Node| match nodes {
            RenderFilter::All => true,
            RenderFilter::Selected => selected.contains(&n.id),
            RenderFilter::Unselected => !selected.contains(&n.id),
            RenderFilter::None => false,
        };
        let kept_nodes: Vec<Node> = self.nodes.iter().filter(|n| keep_node(n)).cloned().collect();
        let present: HashSet<NodeId> = kept_nodes.iter().map(|n| n.id).collect();

        let keep_link = |l: &Link| {
            if !present.contains(&l.origin_id) || !present.contains(&l.target_id) {
                return false;
            }
            let both = selected.contains(&l.origin_id) && selected.contains(&l.target_id);
            match links {
                RenderFilter::All => true,
                RenderFilter::Selected => both,
                RenderFilter::Unselected => !both,
                RenderFilter::None => false,
            }
        };

        Scene {
            nodes: kept_nodes,
            groups: self.groups.clone(),
            links: self.links.iter().filter(|l| keep_link(l)).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: NodeId, x: f32, y: f32) -> Node {
        Node {
            id,
            title: format!("Node {id}"),
            kind: "Test".to_string(),
            geometry: Some(Rect::new(x, y, 200.0, 100.0)),
            collapsed: false,
            color: None,
            bgcolor: None,
            mode: NodeMode::Always,
            inputs: vec![Slot::default()],
            outputs: vec![Slot::default(), Slot::default()],
            widgets: Vec::new(),
            widgets_start_y: None,
            media: None,
        }
    }

    fn link(id: i64, from: NodeId, to: NodeId) -> Link {
        Link {
            id,
            origin_id: from,
            origin_slot: 0,
            target_id: to,
            target_slot: 0,
            kind: "IMAGE".to_string(),
        }
    }

    fn scene() -> Scene {
        Scene {
            nodes: vec![node(1, 0.0, 0.0), node(2, 300.0, 0.0), node(3, 600.0, 0.0)],
            groups: Vec::new(),
            links: vec![link(1, 1, 2), link(2, 2, 3)],
        }
    }

    #[test]
    fn test_bounding_includes_title() {
        let n = node(1, 10.0, 50.0);
        assert_eq!(n.bounding(), Some(Rect::new(10.0, 20.0, 200.0, 130.0)));
    }

    #[test]
    fn test_collapsed_bounding() {
        let mut n = node(1, 0.0, 40.0);
        n.collapsed = true;
        let b = n.bounding().unwrap();
        assert_eq!(b.height, NODE_TITLE_HEIGHT);
        assert_eq!(b.y, 10.0);
    }

    #[test]
    fn test_slot_positions() {
        let n = node(1, 0.0, 0.0);
        assert_eq!(n.input_pos(0), Some(Point::new(10.0, 14.0)));
        assert_eq!(n.output_pos(1), Some(Point::new(190.0, 34.0)));
    }

    #[test]
    fn test_widget_rows_follow_slots() {
        let mut n = node(1, 0.0, 0.0);
        n.widgets = vec![
            Widget {
                name: "seed".into(),
                value: Value::from(5),
                multiline: false,
                y: None,
                height: None,
            },
            Widget {
                name: "steps".into(),
                value: Value::from(20),
                multiline: false,
                y: None,
                height: None,
            },
        ];
        // two output slots: 2 * 20 + 4
        assert_eq!(n.widget_rows(), vec![(44.0, 20.0), (68.0, 20.0)]);
    }

    #[test]
    fn test_preview_rect_below_widgets() {
        let mut n = node(1, 0.0, 0.0);
        n.geometry = Some(Rect::new(0.0, 0.0, 200.0, 300.0));
        n.widgets = vec![Widget {
            name: "image".into(),
            value: Value::from("a.png"),
            multiline: false,
            y: Some(10.0),
            height: Some(20.0),
        }];
        let r = n.preview_rect().unwrap();
        assert_eq!(r, Rect::new(1.0, 34.0, 198.0, 264.0));
    }

    #[test]
    fn test_preview_rect_too_small() {
        let mut n = node(1, 0.0, 0.0);
        n.geometry = Some(Rect::new(0.0, 0.0, 200.0, 34.0));
        assert_eq!(n.preview_rect(), None);
    }

    #[test]
    fn test_filter_selected() {
        let selected: HashSet<NodeId> = [1, 2].into_iter().collect();
        let s = scene().filtered(&selected, RenderFilter::Selected, RenderFilter::Selected);
        assert_eq!(s.nodes.len(), 2);
        assert_eq!(s.links.len(), 1);
        assert_eq!(s.links[0].id, 1);
    }

    #[test]
    fn test_filter_unselected_links() {
        let selected: HashSet<NodeId> = [1, 2].into_iter().collect();
        let s = scene().filtered(&selected, RenderFilter::All, RenderFilter::Unselected);
        assert_eq!(s.nodes.len(), 3);
        assert_eq!(s.links.iter().map(|l| l.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_filter_empty_selection_is_noop() {
        let s = scene().filtered(&HashSet::new(), RenderFilter::None, RenderFilter::None);
        assert_eq!(s, scene());
    }

    #[test]
    fn test_entity_rects_with_selection() {
        let selected: HashSet<NodeId> = [3].into_iter().collect();
        let rects = scene().entity_rects(Some(&selected));
        assert_eq!(rects, vec![Some(Rect::new(600.0, -30.0, 200.0, 130.0))]);
    }

    #[test]
    fn test_display_value() {
        let w = |v: Value| Widget {
            name: String::new(),
            value: v,
            multiline: false,
            y: None,
            height: None,
        };
        assert_eq!(w(Value::from(7.5)).display_value(), "7.5");
        assert_eq!(w(Value::from(8)).display_value(), "8");
        assert_eq!(w(Value::from(true)).display_value(), "true");
        assert_eq!(w(Value::from("euler")).display_value(), "euler");
    }
}
