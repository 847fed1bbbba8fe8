//! Overlay compositing through the full export: images, video posters, text,
//! node previews from a media root, and capture timeouts.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::json;
use workflow_image_export::config::ExportRequest;
use workflow_image_export::encoding::encode_buffer;
use workflow_image_export::export::Exporter;
use workflow_image_export::geometry::Rect;
use workflow_image_export::overlay::{
    CaptureError, DecodingResolver, Frame, MediaResolver, MediaSource, OverlayElement,
    OverlaySource, TextStyle,
};
use workflow_image_export::raster::{PixelBuffer, Rgba};
use workflow_image_export::rendering::{SkiaTileRenderer, TextRasterizer};
use workflow_image_export::scene::SceneSnapshot;

const BLUE: Rgba = Rgba::rgb(0, 0, 255);
const GREEN: Rgba = Rgba::rgb(0, 255, 0);

/// One node whose outline covers (0,0)-(200,100).
fn single_node() -> SceneSnapshot {
    SceneSnapshot::new(json!({
        "nodes": [{"id": 1, "type": "Preview", "pos": [0, 30], "size": [200, 70]}],
        "links": []
    }))
}

fn png_of(color: Rgba) -> Arc<Vec<u8>> {
    Arc::new(encode_buffer(&PixelBuffer::filled(4, 4, color), 6).unwrap())
}

fn exporter() -> Exporter {
    Exporter::new()
        .with_renderer(SkiaTileRenderer::with_text(TextRasterizer::block_glyphs()))
        .with_text(TextRasterizer::block_glyphs())
}

fn request() -> ExportRequest {
    ExportRequest::new().with_padding(0).with_embed_workflow(false)
}

fn pixel(png: &[u8], x: u32, y: u32) -> Rgba {
    let img = image::load_from_memory(png).unwrap().to_rgba8();
    let p = img.get_pixel(x, y).0;
    Rgba::new(p[0], p[1], p[2], p[3])
}

mod media {
    use super::*;

    #[tokio::test]
    async fn test_image_overlay_drawn_in_graph_space() {
        let overlay = OverlayElement::image(
            Rect::new(20.0, 40.0, 100.0, 50.0),
            MediaSource::Bytes(png_of(BLUE)),
        );
        let out = exporter()
            .export(&request(), &single_node(), vec![overlay])
            .await
            .unwrap();
        assert_eq!(pixel(&out.bytes, 70, 65), BLUE);
        assert_ne!(pixel(&out.bytes, 150, 65), BLUE);
    }

    #[tokio::test]
    async fn test_video_falls_back_to_poster() {
        let overlay = OverlayElement::video(
            Rect::new(20.0, 40.0, 100.0, 50.0),
            Some(MediaSource::DataUri("data:video/mp4;base64,AAAA".to_string())),
            Some(MediaSource::Bytes(png_of(GREEN))),
        );
        let out = exporter()
            .export(&request(), &single_node(), vec![overlay])
            .await
            .unwrap();
        assert_eq!(pixel(&out.bytes, 70, 65), GREEN);
    }

    #[tokio::test]
    async fn test_oversized_image_skipped() {
        let overlay = OverlayElement::image(
            Rect::new(-500.0, -500.0, 2000.0, 2000.0),
            MediaSource::Bytes(png_of(BLUE)),
        );
        let out = exporter()
            .export(&request(), &single_node(), vec![overlay])
            .await
            .unwrap();
        assert_ne!(pixel(&out.bytes, 100, 65), BLUE);
    }

    #[tokio::test]
    async fn test_overlays_disabled() {
        let overlay = OverlayElement::image(
            Rect::new(20.0, 40.0, 100.0, 50.0),
            MediaSource::Bytes(png_of(BLUE)),
        );
        let mut req = request();
        req.include_overlays = false;
        let out = exporter().export(&req, &single_node(), vec![overlay]).await.unwrap();
        assert_ne!(pixel(&out.bytes, 70, 65), BLUE);
    }

    #[tokio::test]
    async fn test_node_preview_from_media_root() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("input")).unwrap();
        std::fs::write(root.path().join("input/pic.png"), png_of(GREEN).as_slice()).unwrap();

        let snapshot = SceneSnapshot::new(json!({
            "nodes": [{
                "id": 1, "type": "LoadImage", "pos": [0, 30], "size": [300, 320],
                "widgets_values": ["pic.png", "image"]
            }],
            "links": []
        }));
        let mut exporter =
            exporter().with_resolver(DecodingResolver::new().with_media_root(root.path()));
        let out = exporter.export(&request(), &snapshot, Vec::new()).await.unwrap();
        assert_eq!(pixel(&out.bytes, 150, 280), GREEN);
    }
}

mod text {
    use super::*;

    #[tokio::test]
    async fn test_text_overlay_background() {
        let style = TextStyle {
            background: Some(Rgba::WHITE),
            ..TextStyle::default()
        };
        let overlay = OverlayElement::text(Rect::new(10.0, 40.0, 180.0, 50.0), "hello\nworld")
            .with_node(1)
            .with_source(OverlaySource::Editor)
            .with_style(style);
        let out = exporter()
            .export(&request(), &single_node(), vec![overlay])
            .await
            .unwrap();
        // right edge of the box, clear of the two short lines
        assert_eq!(pixel(&out.bytes, 185, 85), Rgba::WHITE);
    }

    #[tokio::test]
    async fn test_stored_multiline_widget_uses_fallback() {
        let snapshot = SceneSnapshot::new(json!({
            "nodes": [{
                "id": 1, "type": "CLIPTextEncode", "pos": [0, 30], "size": [300, 200],
                "widgets_values": ["a very long prompt that certainly spans more than forty characters"]
            }],
            "links": []
        }));
        let with_overlays = exporter()
            .export(&request(), &snapshot, Vec::new())
            .await
            .unwrap();
        let mut req = request();
        req.include_overlays = false;
        let without = exporter().export(&req, &snapshot, Vec::new()).await.unwrap();
        assert_ne!(with_overlays.bytes, without.bytes);
    }
}

mod timeouts {
    use super::*;

    struct NeverResolver;

    impl MediaResolver for NeverResolver {
        fn resolve<'a>(
            &'a self,
            _source: &'a MediaSource,
        ) -> LocalBoxFuture<'a, Result<Frame, CaptureError>> {
            futures::future::pending().boxed_local()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_capture_is_skipped() {
        let overlay = OverlayElement::image(
            Rect::new(20.0, 40.0, 100.0, 50.0),
            MediaSource::Bytes(png_of(BLUE)),
        );
        let mut exporter = exporter()
            .with_resolver(NeverResolver)
            .with_capture_timeout(Duration::from_millis(50));
        let out = exporter
            .export(&request(), &single_node(), vec![overlay])
            .await
            .unwrap();
        assert_ne!(pixel(&out.bytes, 70, 65), BLUE);
    }
}
