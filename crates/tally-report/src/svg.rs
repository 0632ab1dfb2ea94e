use crate::{write_atomic, Reporter};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tally_core::TimeSeries;

const MARGIN_LEFT: f64 = 48.0;
const MARGIN_RIGHT: f64 = 16.0;
const MARGIN_TOP: f64 = 32.0;
const MARGIN_BOTTOM: f64 = 72.0;
/// Above this many points, x labels are thinned out.
const MAX_X_LABELS: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 360,
            title: "Passing tests per day".into(),
        }
    }
}

/// Step chart: one flat step per point, day labels on x, passed count on y,
/// the denominator as y maximum and a dashed reference line.
#[derive(Debug, Clone, Default)]
pub struct SvgStepChart {
    pub config: ChartConfig,
}

impl SvgStepChart {
    pub fn new(config: ChartConfig) -> Self {
        Self { config }
    }
}

impl Reporter for SvgStepChart {
    fn render(&self, series: &TimeSeries, out: &Path) -> anyhow::Result<()> {
        let svg = render_step_chart_svg(series, &self.config);
        write_atomic(out, svg.as_bytes())
    }
}

pub fn render_step_chart_svg(series: &TimeSeries, config: &ChartConfig) -> String {
    let width = config.width as f64;
    let height = config.height as f64;
    let plot_w = (width - MARGIN_LEFT - MARGIN_RIGHT).max(1.0);
    let plot_h = (height - MARGIN_TOP - MARGIN_BOTTOM).max(1.0);

    let values = series.values();
    let y_max = values
        .iter()
        .copied()
        .chain(std::iter::once(series.denominator))
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    let y_of = |v: u32| MARGIN_TOP + plot_h - (v as f64 / y_max) * plot_h;

    let mut svg = format!(
        "<svg xmlns='http://www.w3.org/2000/svg' width='{w}' height='{h}' viewBox='0 0 {w} {h}' font-family='sans-serif'>",
        w = config.width,
        h = config.height
    );
    let _ = write!(
        svg,
        "<text x='{:.2}' y='20' font-size='14' text-anchor='middle'>{}</text>",
        width / 2.0,
        xml_escape(&config.title)
    );

    // Axes.
    let x0 = MARGIN_LEFT;
    let y0 = MARGIN_TOP + plot_h;
    let _ = write!(
        svg,
        "<path d='M{x0:.2},{MARGIN_TOP:.2} V{y0:.2} H{:.2}' fill='none' stroke='#374151' />",
        x0 + plot_w
    );
    for tick in [0, y_max as u32] {
        let _ = write!(
            svg,
            "<text x='{:.2}' y='{:.2}' font-size='10' text-anchor='end'>{tick}</text>",
            x0 - 6.0,
            y_of(tick) + 3.0
        );
    }

    if series.denominator > 0 {
        let y = y_of(series.denominator);
        let _ = write!(
            svg,
            "<line x1='{x0:.2}' y1='{y:.2}' x2='{:.2}' y2='{y:.2}' stroke='#9ca3af' stroke-dasharray='4 3' />",
            x0 + plot_w
        );
    }

    if !values.is_empty() {
        let step_w = plot_w / values.len() as f64;
        let mut d = format!("M{x0:.2},{:.2}", y_of(values[0]));
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                let _ = write!(d, " V{:.2}", y_of(*v));
            }
            let _ = write!(d, " H{:.2}", x0 + step_w * (i + 1) as f64);
        }
        let _ = write!(
            svg,
            "<path d='{d}' fill='none' stroke='#3b82f6' stroke-width='2' />"
        );

        let every = values.len().div_ceil(MAX_X_LABELS).max(1);
        for (i, label) in series.labels().iter().enumerate() {
            if i % every != 0 {
                continue;
            }
            let x = x0 + step_w * (i as f64 + 0.5);
            let y = y0 + 12.0;
            let _ = write!(
                svg,
                "<text x='{x:.2}' y='{y:.2}' font-size='9' text-anchor='end' transform='rotate(-45 {x:.2} {y:.2})'>{}</text>",
                xml_escape(label)
            );
        }
    }

    svg.push_str("</svg>");
    svg
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
