// Render surface - Projects series snapshots into horizon chart frames
use crate::application::series_context::{ContextId, SeriesSnapshot, StreamSnapshot};
use crate::domain::node::DisplayPreferences;
use crate::domain::selector::MetricSelector;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub const DEFAULT_PALETTE: [&str; 8] = [
    "#08519c", "#3182bd", "#6baed6", "#bdd7e7", "#bae4b3", "#74c476", "#31a354", "#006d2c",
];

const BANDS: i8 = 4;
const ROW_HEIGHT: usize = 30;
const AXIS_HEIGHT: usize = 20;
const LABEL_WIDTH: usize = 120;
const AXIS_TICKS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisTick {
    pub slot: usize,
    pub timestamp: i64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonRow {
    pub node_id: String,
    pub color: String,
    /// Largest absolute value in the window; band levels are relative to it.
    pub extent: f64,
    /// Signed band level per window slot, `None` for gaps.
    pub levels: Vec<Option<i8>>,
    pub values: Vec<Option<f64>>,
    pub failing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocusValue {
    pub node_id: String,
    pub timestamp: i64,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HorizonFrame {
    /// Bumped every time previously rendered rows are thrown away.
    pub generation: u64,
    pub context_id: Option<ContextId>,
    pub metric: Option<String>,
    pub step_seconds: u32,
    pub window_start: i64,
    pub window_stop: i64,
    pub axis: Vec<AxisTick>,
    pub rows: Vec<HorizonRow>,
    pub error: Option<String>,
}

impl HorizonFrame {
    /// Value of every row at one window slot (the hover rule).
    pub fn focus(&self, slot: usize) -> Vec<FocusValue> {
        let timestamp = i64::try_from(slot)
            .ok()
            .and_then(|s| s.checked_mul(i64::from(self.step_seconds)))
            .and_then(|offset| self.window_start.checked_add(offset));
        let Some(timestamp) = timestamp else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter(|row| slot < row.values.len())
            .map(|row| FocusValue {
                node_id: row.node_id.clone(),
                timestamp,
                value: row.values[slot],
            })
            .collect()
    }

    pub fn to_svg(&self) -> String {
        let slots = self.rows.first().map(|r| r.levels.len()).unwrap_or(0);
        let width = LABEL_WIDTH + slots;
        let height = AXIS_HEIGHT + self.rows.len() * ROW_HEIGHT;
        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
        );

        if let Some(error) = &self.error {
            let _ = write!(
                svg,
                r#"<text class="error" x="4" y="14">{}</text></svg>"#,
                escape(error)
            );
            return svg;
        }

        svg.push_str(r#"<g class="axis">"#);
        for tick in &self.axis {
            let x = LABEL_WIDTH + tick.slot;
            let _ = write!(
                svg,
                r#"<line x1="{x}" y1="{AXIS_HEIGHT}" x2="{x}" y2="{}" /><text x="{x}" y="12">{}</text>"#,
                AXIS_HEIGHT - 4,
                escape(&tick.label)
            );
        }
        svg.push_str("</g>");

        for (rank, row) in self.rows.iter().enumerate() {
            let y = AXIS_HEIGHT + rank * ROW_HEIGHT;
            let _ = write!(
                svg,
                r#"<g class="horizon" data-node="{node}"><text x="4" y="{}">{node}</text>"#,
                y + ROW_HEIGHT / 2 + 4,
                node = escape(&row.node_id)
            );
            for (slot, level) in row.levels.iter().enumerate() {
                let Some(level) = level.filter(|l| *l != 0) else {
                    continue;
                };
                let opacity = f64::from(level.unsigned_abs()) / f64::from(BANDS);
                let class = if level < 0 { "negative" } else { "positive" };
                let _ = write!(
                    svg,
                    r#"<rect class="{class}" x="{}" y="{y}" width="1" height="{ROW_HEIGHT}" fill="{}" fill-opacity="{opacity:.2}" />"#,
                    LABEL_WIDTH + slot,
                    row.color
                );
            }
            svg.push_str("</g>");
        }

        svg.push_str("</svg>");
        svg
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Band level of `value` relative to `extent`: 0 for zero, otherwise
/// `1..=BANDS` with the sign of the value.
pub fn band_level(value: f64, extent: f64) -> i8 {
    if value == 0.0 || extent <= 0.0 || !value.is_finite() {
        return 0;
    }
    let bands = f64::from(BANDS);
    let level = ((value.abs() / extent) * bands).ceil().clamp(1.0, bands) as i8;
    if value < 0.0 { -level } else { level }
}

#[derive(Debug, Clone, PartialEq)]
struct Layout {
    context_id: ContextId,
    selector: MetricSelector,
    nodes: Vec<String>,
}

#[derive(Debug)]
pub struct RenderSurface {
    palette: Vec<String>,
    preferences: DisplayPreferences,
    layout: Option<Layout>,
    frame: HorizonFrame,
}

impl RenderSurface {
    pub fn new(palette: Vec<String>, preferences: DisplayPreferences) -> Self {
        let palette = if palette.is_empty() {
            DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect()
        } else {
            palette
        };
        Self {
            palette,
            preferences,
            layout: None,
            frame: HorizonFrame::default(),
        }
    }

    pub fn frame(&self) -> &HorizonFrame {
        &self.frame
    }

    pub fn set_preferences(&mut self, preferences: DisplayPreferences) {
        self.preferences = preferences;
    }

    /// Drop every rendered row and the axis.
    pub fn clear(&mut self) {
        self.layout = None;
        self.frame = HorizonFrame {
            generation: self.frame.generation + 1,
            ..HorizonFrame::default()
        };
    }

    pub fn show_error(&mut self, message: impl Into<String>) {
        self.clear();
        self.frame.error = Some(message.into());
    }

    pub fn render(&mut self, snapshot: &SeriesSnapshot) -> &HorizonFrame {
        let layout = Layout {
            context_id: snapshot.context_id,
            selector: snapshot.selector.clone(),
            nodes: snapshot.node_ids().map(str::to_string).collect(),
        };
        if self.layout.as_ref() != Some(&layout) {
            self.clear();
            self.layout = Some(layout);
        }

        let step = snapshot.selector.step();
        let slots = snapshot.window_size;
        self.frame.context_id = Some(snapshot.context_id);
        self.frame.metric = Some(snapshot.selector.metric_name().to_string());
        self.frame.step_seconds = snapshot.selector.step_seconds();
        self.frame.window_start = snapshot.window_start;
        self.frame.window_stop = snapshot.window_stop;
        self.frame.error = None;

        if snapshot.window_stop <= snapshot.window_start {
            // Nothing fetched yet.
            self.frame.axis.clear();
            self.frame.rows.clear();
            return &self.frame;
        }

        self.frame.axis = self.axis(snapshot.window_start, step, slots);
        self.frame.rows = snapshot
            .streams
            .iter()
            .enumerate()
            .map(|(rank, stream)| self.row(rank, stream, snapshot.window_start, step, slots))
            .collect();
        &self.frame
    }

    fn row(
        &self,
        rank: usize,
        stream: &StreamSnapshot,
        window_start: i64,
        step: i64,
        slots: usize,
    ) -> HorizonRow {
        let mut values = vec![None; slots];
        for bucket in &stream.buckets {
            let offset = bucket.timestamp - window_start;
            if offset < 0 || offset % step != 0 {
                continue;
            }
            if let Some(slot) = values.get_mut((offset / step) as usize) {
                *slot = bucket.value;
            }
        }

        let extent = values
            .iter()
            .flatten()
            .fold(0.0_f64, |max, v| max.max(v.abs()));
        let levels = values
            .iter()
            .map(|v| v.map(|v| band_level(v, extent)))
            .collect();

        HorizonRow {
            node_id: stream.node_id.clone(),
            color: self.palette[rank % self.palette.len()].clone(),
            extent,
            levels,
            values,
            failing: stream.consecutive_failures > 0,
        }
    }

    fn axis(&self, window_start: i64, step: i64, slots: usize) -> Vec<AxisTick> {
        let spacing = (slots / AXIS_TICKS).max(1);
        let with_seconds = step < 60;
        (0..slots)
            .step_by(spacing)
            .map(|slot| {
                let timestamp = window_start + slot as i64 * step;
                AxisTick {
                    slot,
                    timestamp,
                    label: self.label(timestamp, with_seconds),
                }
            })
            .collect()
    }

    fn label(&self, timestamp: i64, with_seconds: bool) -> String {
        let format = if with_seconds { "%H:%M:%S" } else { "%H:%M" };
        if self.preferences.uses_utc() {
            format_in(&Utc, timestamp, format)
        } else {
            format_in(&Local, timestamp, format)
        }
    }
}

fn format_in<Tz: TimeZone>(tz: &Tz, timestamp: i64, format: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match DateTime::from_timestamp(timestamp, 0) {
        Some(utc) => utc.with_timezone(tz).format(format).to_string(),
        None => timestamp.to_string(),
    }
}

/// What the surface should draw from next.
#[derive(Debug)]
pub enum RenderCommand {
    Attach(watch::Receiver<Arc<SeriesSnapshot>>),
    Preferences(DisplayPreferences),
    Error(String),
}

/// Redraw whenever the attached context publishes, until the command channel closes.
pub async fn run_surface(
    mut surface: RenderSurface,
    mut commands: mpsc::Receiver<RenderCommand>,
    frames: watch::Sender<Arc<HorizonFrame>>,
) {
    let mut source: Option<watch::Receiver<Arc<SeriesSnapshot>>> = None;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None => return,
                Some(RenderCommand::Attach(mut snapshots)) => {
                    let snapshot = snapshots.borrow_and_update().clone();
                    surface.render(&snapshot);
                    source = Some(snapshots);
                }
                Some(RenderCommand::Preferences(preferences)) => {
                    surface.set_preferences(preferences);
                    if let Some(snapshots) = &source {
                        let snapshot = snapshots.borrow().clone();
                        surface.render(&snapshot);
                    }
                }
                Some(RenderCommand::Error(message)) => {
                    source = None;
                    surface.show_error(message);
                }
            },
            changed = next_change(&mut source) => {
                match changed {
                    Ok(()) => {
                        if let Some(snapshots) = source.as_mut() {
                            let snapshot = snapshots.borrow_and_update().clone();
                            surface.render(&snapshot);
                        }
                    }
                    // The context was retired; keep the last frame until the next attach.
                    Err(_) => source = None,
                }
            }
        }
        frames.send_replace(Arc::new(surface.frame().clone()));
    }
}

async fn next_change(
    source: &mut Option<watch::Receiver<Arc<SeriesSnapshot>>>,
) -> Result<(), watch::error::RecvError> {
    match source {
        Some(snapshots) => snapshots.changed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stream::Bucket;

    fn snapshot(id: u64, metric: &str, streams: Vec<(&str, Vec<Bucket>)>) -> SeriesSnapshot {
        SeriesSnapshot {
            context_id: ContextId::new(id),
            selector: MetricSelector::new(metric, 5).unwrap(),
            window_size: 4,
            window_start: 0,
            window_stop: 20,
            streams: streams
                .into_iter()
                .map(|(node, buckets)| StreamSnapshot {
                    node_id: node.to_string(),
                    buckets,
                    consecutive_failures: 0,
                })
                .collect(),
        }
    }

    fn surface() -> RenderSurface {
        RenderSurface::new(
            vec!["red".to_string(), "blue".to_string()],
            DisplayPreferences {
                timezone: "gmt".to_string(),
            },
        )
    }

    #[test]
    fn test_band_levels() {
        assert_eq!(band_level(0.0, 10.0), 0);
        assert_eq!(band_level(10.0, 10.0), 4);
        assert_eq!(band_level(2.0, 10.0), 1);
        assert_eq!(band_level(-6.0, 10.0), -3);
        assert_eq!(band_level(f64::NAN, 10.0), 0);
    }

    #[test]
    fn test_gaps_stay_gaps() {
        let mut surface = surface();
        let frame = surface.render(&snapshot(
            1,
            "m",
            vec![(
                "node-a",
                vec![
                    Bucket::new(0, Some(8.0)),
                    Bucket::new(5, None),
                    Bucket::new(10, Some(0.0)),
                ],
            )],
        ));

        let row = &frame.rows[0];
        assert_eq!(row.values, vec![Some(8.0), None, Some(0.0), None]);
        assert_eq!(row.levels, vec![Some(4), None, Some(0), None]);
        assert_eq!(row.extent, 8.0);
    }

    #[test]
    fn test_colors_follow_node_rank() {
        let mut surface = surface();
        let streams = vec![
            ("node-a", vec![]),
            ("node-b", vec![]),
            ("node-c", vec![]),
        ];
        let frame = surface.render(&snapshot(1, "m", streams.clone()));
        let colors: Vec<&str> = frame.rows.iter().map(|r| r.color.as_str()).collect();
        assert_eq!(colors, vec!["red", "blue", "red"]);

        let again = surface.render(&snapshot(1, "m", streams)).clone();
        assert_eq!(again.rows[1].color, "blue");
    }

    #[test]
    fn test_layout_change_clears_previous_rows() {
        let mut surface = surface();
        let first = surface
            .render(&snapshot(1, "m", vec![("node-a", vec![Bucket::new(0, Some(1.0))])]))
            .generation;
        let same = surface
            .render(&snapshot(1, "m", vec![("node-a", vec![Bucket::new(5, Some(1.0))])]))
            .generation;
        assert_eq!(first, same);

        let frame = surface.render(&snapshot(2, "other", vec![("node-b", vec![])]));
        assert!(frame.generation > first);
        assert_eq!(frame.rows.len(), 1);
        assert_eq!(frame.rows[0].node_id, "node-b");
        assert_eq!(frame.metric.as_deref(), Some("other"));
    }

    #[test]
    fn test_axis_labels_in_utc() {
        let mut surface = surface();
        let frame = surface.render(&snapshot(1, "m", vec![("node-a", vec![])]));
        assert_eq!(frame.axis[0].label, "00:00:00");
        assert_eq!(frame.axis[1].timestamp, 5);
        assert_eq!(frame.axis[1].label, "00:00:05");
    }

    #[test]
    fn test_focus_reads_values_at_slot() {
        let mut surface = surface();
        let frame = surface.render(&snapshot(
            1,
            "m",
            vec![
                ("node-a", vec![Bucket::new(0, Some(1.0)), Bucket::new(5, Some(2.0))]),
                ("node-b", vec![Bucket::new(0, None)]),
            ],
        ));
        let focus = frame.focus(1);
        assert_eq!(focus[0].timestamp, 5);
        assert_eq!(focus[0].value, Some(2.0));
        assert_eq!(focus[1].value, None);
        assert!(frame.focus(10).is_empty());
        assert!(frame.focus(usize::MAX / 2).is_empty());
        assert!(frame.focus(usize::MAX).is_empty());
    }

    #[test]
    fn test_svg_skips_gaps_and_escapes_labels() {
        let mut surface = surface();
        let svg = surface
            .render(&snapshot(
                1,
                "m",
                vec![("a<b", vec![Bucket::new(0, Some(1.0)), Bucket::new(5, None)])],
            ))
            .to_svg();
        assert_eq!(svg.matches("<rect").count(), 1);
        assert!(svg.contains("a&lt;b"));

        surface.show_error("Unable to load stats");
        let svg = surface.frame().to_svg();
        assert!(svg.contains("Unable to load stats"));
        assert!(!svg.contains("<rect"));
    }

    #[tokio::test]
    async fn test_surface_redraws_on_publish_and_reattach() {
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (frames_tx, mut frames) = watch::channel(Arc::new(HorizonFrame::default()));
        let task = tokio::spawn(run_surface(surface(), commands_rx, frames_tx));

        let (snap_tx, snap_rx) = watch::channel(Arc::new(snapshot(1, "m", vec![("node-a", vec![])])));
        commands_tx.send(RenderCommand::Attach(snap_rx)).await.unwrap();
        frames.changed().await.unwrap();
        assert_eq!(frames.borrow().context_id, Some(ContextId::new(1)));

        snap_tx.send_replace(Arc::new(snapshot(
            1,
            "m",
            vec![("node-a", vec![Bucket::new(0, Some(3.0))])],
        )));
        frames.changed().await.unwrap();
        assert_eq!(frames.borrow().rows[0].values[0], Some(3.0));

        let (_next_tx, next_rx) = watch::channel(Arc::new(snapshot(2, "n", vec![("node-z", vec![])])));
        commands_tx.send(RenderCommand::Attach(next_rx)).await.unwrap();
        frames.changed().await.unwrap();
        {
            let frame = frames.borrow();
            assert_eq!(frame.context_id, Some(ContextId::new(2)));
            assert_eq!(frame.rows.len(), 1);
            assert_eq!(frame.rows[0].node_id, "node-z");
        }

        drop(commands_tx);
        task.await.unwrap();
    }
}
