use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::indicator::macd::{HistogramTone, histogram_tone};
use crate::model::Candle;
use crate::session::ChartSession;

const WIDTH: f64 = 960.0;
const TOTAL_HEIGHT: f64 = 520.0;
const PANE_HEIGHT: f64 = 110.0;
const MARGIN: f64 = 12.0;

const BACKGROUND: &str = "#10151d";
const UP_COLOR: &str = "#2ECC71";
const DOWN_COLOR: &str = "#E74C3C";
const SMA_COLOR: &str = "#FFC107";
const BAND_COLOR: &str = "#455A64";
const RSI_COLOR: &str = "#DB8ADE";
const MACD_COLOR: &str = "#4285F4";
const SIGNAL_COLOR: &str = "#FB8C00";
const HIST_UP_COLOR: &str = "rgba(38,166,154,0.5)";
const HIST_DOWN_COLOR: &str = "rgba(239,83,80,0.5)";
const GUIDE_COLOR: &str = "#4A6572";

/// Vertical slice of the document owned by one pane.
struct Pane {
    top: f64,
    height: f64,
}

impl Pane {
    /// Map a value inside [min, max] to a y coordinate, inverted so larger
    /// values render higher.
    fn y(&self, value: f64, min: f64, max: f64) -> f64 {
        let span = (max - min).max(f64::EPSILON);
        self.top + (max - value) / span * self.height
    }
}

/// Render the session's candles and every enabled overlay into a
/// self-contained SVG document.
///
/// Overlays are read from the session's current series on each call, so a
/// configuration change is fully reflected by the next snapshot.
pub fn render(session: &ChartSession) -> Vec<u8> {
    let candles = session.candles();
    let series = session.series();

    let mut pane_count = 0;
    if series.rsi.is_some() {
        pane_count += 1;
    }
    if series.macd.is_some() {
        pane_count += 1;
    }
    let price_pane = Pane {
        top: MARGIN,
        height: TOTAL_HEIGHT - 2.0 * MARGIN - pane_count as f64 * PANE_HEIGHT,
    };

    let mut svg = String::with_capacity(32 * 1024);
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{TOTAL_HEIGHT}" viewBox="0 0 {WIDTH} {TOTAL_HEIGHT}">"#
    );
    let _ = write!(
        svg,
        r#"<rect width="{WIDTH}" height="{TOTAL_HEIGHT}" fill="{BACKGROUND}"/>"#
    );

    if !candles.is_empty() {
        draw_price_pane(&mut svg, candles, series, &price_pane);

        let mut next_top = price_pane.top + price_pane.height;
        if let Some(rsi) = &series.rsi {
            let pane = Pane {
                top: next_top,
                height: PANE_HEIGHT,
            };
            draw_rsi_pane(&mut svg, rsi, &pane);
            next_top += PANE_HEIGHT;
        }
        if let Some(macd) = &series.macd {
            let pane = Pane {
                top: next_top,
                height: PANE_HEIGHT,
            };
            draw_macd_pane(&mut svg, macd, &pane);
        }
    }

    svg.push_str("</svg>");
    svg.into_bytes()
}

/// Base64 data URI for embedding the snapshot in an analysis request.
pub fn data_uri(svg: &[u8]) -> String {
    format!("data:image/svg+xml;base64,{}", BASE64.encode(svg))
}

fn slot_width(count: usize) -> f64 {
    (WIDTH - 2.0 * MARGIN) / count as f64
}

fn x_center(index: usize, count: usize) -> f64 {
    MARGIN + (index as f64 + 0.5) * slot_width(count)
}

fn draw_price_pane(
    svg: &mut String,
    candles: &[Candle],
    series: &crate::session::DerivedSeries,
    pane: &Pane,
) {
    // Price range covers wicks plus any visible band overlay
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for candle in candles {
        min = min.min(candle.low);
        max = max.max(candle.high);
    }
    if let Some(bands) = &series.bollinger {
        for v in bands.upper.iter().chain(bands.lower.iter()).flatten() {
            min = min.min(*v);
            max = max.max(*v);
        }
    }
    let pad = (max - min).max(f64::EPSILON) * 0.05;
    let (min, max) = (min - pad, max + pad);

    let count = candles.len();
    let body_width = (slot_width(count) * 0.7).max(1.0);

    for (i, candle) in candles.iter().enumerate() {
        let x = x_center(i, count);
        let color = if candle.close >= candle.open {
            UP_COLOR
        } else {
            DOWN_COLOR
        };
        let wick_top = pane.y(candle.high, min, max);
        let wick_bottom = pane.y(candle.low, min, max);
        let _ = write!(
            svg,
            r#"<line x1="{x:.2}" y1="{wick_top:.2}" x2="{x:.2}" y2="{wick_bottom:.2}" stroke="{color}" stroke-width="1"/>"#
        );

        let body_top = pane.y(candle.open.max(candle.close), min, max);
        let body_bottom = pane.y(candle.open.min(candle.close), min, max);
        let height = (body_bottom - body_top).max(1.0);
        let _ = write!(
            svg,
            r#"<rect x="{:.2}" y="{body_top:.2}" width="{body_width:.2}" height="{height:.2}" fill="{color}"/>"#,
            x - body_width / 2.0
        );
    }

    if let Some(sma) = &series.sma {
        draw_line(svg, sma, pane, min, max, SMA_COLOR, 2.0, false);
    }
    if let Some(bands) = &series.bollinger {
        draw_line(svg, &bands.upper, pane, min, max, BAND_COLOR, 1.0, false);
        draw_line(svg, &bands.middle, pane, min, max, BAND_COLOR, 1.0, true);
        draw_line(svg, &bands.lower, pane, min, max, BAND_COLOR, 1.0, false);
    }
}

fn draw_rsi_pane(svg: &mut String, rsi: &[Option<f64>], pane: &Pane) {
    for guide in [70.0, 30.0] {
        let y = pane.y(guide, 0.0, 100.0);
        let _ = write!(
            svg,
            r#"<line x1="{MARGIN}" y1="{y:.2}" x2="{:.2}" y2="{y:.2}" stroke="{GUIDE_COLOR}" stroke-width="1" stroke-dasharray="4 4"/>"#,
            WIDTH - MARGIN
        );
    }
    draw_line(svg, rsi, pane, 0.0, 100.0, RSI_COLOR, 2.0, false);
}

fn draw_macd_pane(svg: &mut String, macd: &crate::indicator::macd::MacdSeries, pane: &Pane) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in macd
        .macd
        .iter()
        .chain(macd.signal.iter())
        .chain(macd.histogram.iter())
        .flatten()
    {
        min = min.min(*v);
        max = max.max(*v);
    }
    if !min.is_finite() {
        return;
    }
    // Keep the zero line inside the pane
    let (min, max) = (min.min(0.0), max.max(0.0));

    let zero_y = pane.y(0.0, min, max);
    let _ = write!(
        svg,
        r#"<line x1="{MARGIN}" y1="{zero_y:.2}" x2="{:.2}" y2="{zero_y:.2}" stroke="{GUIDE_COLOR}" stroke-width="1"/>"#,
        WIDTH - MARGIN
    );

    let count = macd.histogram.len();
    let bar_width = (slot_width(count) * 0.6).max(1.0);
    for (i, value) in macd.histogram.iter().enumerate() {
        let Some(value) = value else { continue };
        let color = match histogram_tone(*value) {
            HistogramTone::Bullish => HIST_UP_COLOR,
            HistogramTone::Bearish => HIST_DOWN_COLOR,
        };
        let y = pane.y(*value, min, max);
        let (top, height) = if *value >= 0.0 {
            (y, zero_y - y)
        } else {
            (zero_y, y - zero_y)
        };
        let _ = write!(
            svg,
            r#"<rect x="{:.2}" y="{top:.2}" width="{bar_width:.2}" height="{:.2}" fill="{color}"/>"#,
            x_center(i, count) - bar_width / 2.0,
            height.max(0.5)
        );
    }

    draw_line(svg, &macd.macd, pane, min, max, MACD_COLOR, 2.0, false);
    draw_line(svg, &macd.signal, pane, min, max, SIGNAL_COLOR, 2.0, false);
}

/// Draw an aligned series as polyline segments, breaking at warm-up gaps.
fn draw_line(
    svg: &mut String,
    series: &[Option<f64>],
    pane: &Pane,
    min: f64,
    max: f64,
    color: &str,
    width: f64,
    dashed: bool,
) {
    let count = series.len();
    let mut points = String::new();
    let mut flush = |points: &mut String, svg: &mut String| {
        if points.contains(' ') {
            let dash = if dashed {
                r#" stroke-dasharray="4 4""#
            } else {
                ""
            };
            let _ = write!(
                svg,
                r#"<polyline points="{points}" fill="none" stroke="{color}" stroke-width="{width}"{dash}/>"#
            );
        }
        points.clear();
    };

    for (i, value) in series.iter().enumerate() {
        match value {
            Some(v) => {
                if !points.is_empty() {
                    points.push(' ');
                }
                let _ = write!(
                    points,
                    "{:.2},{:.2}",
                    x_center(i, count),
                    pane.y(*v, min, max)
                );
            }
            None => flush(&mut points, svg),
        }
    }
    flush(&mut points, svg);
}
