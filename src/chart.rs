//! Scatter charts of penetration against armor damage, one per category,
//! bundled into an HTML fragment with a selector to switch between them.

use std::{ops::Range, path::Path};

use itertools::Itertools;
use log::{info, warn};
use ordered_float::OrderedFloat;
use svg::{
    node::element::{Circle, Group, Line, Rectangle, Text},
    Document,
};

use crate::{
    catalog::NameCatalog,
    dataset::{AmmoRecord, Column, Dataset},
};

const WIDTH: f64 = 1000.;
const HEIGHT: f64 = 900.;
const MARGIN: f64 = 70.;
/// Marker diameter of a cartridge dealing the category's median damage.
const BASE_SIZE: f64 = 30.;
const PAPER_COLOR: &str = "#1f2424";
const PLOT_COLOR: &str = "#e5ecf6";
const FONT_COLOR: &str = "#fefefe";

fn map_float(a: f64, src: Range<f64>, dst: Range<f64>) -> f64 {
    dst.start + (dst.end - dst.start) * (a - src.start) / (src.end - src.start)
}

pub fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let sorted = values.into_iter().map(OrderedFloat).sorted().collect_vec();
    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => None,
        n if n % 2 == 1 => Some(sorted[mid].0),
        _ => Some((sorted[mid - 1].0 + sorted[mid].0) / 2.),
    }
}

/// A step of 1, 2 or 5 times a power of ten giving roughly `ticks` gridlines.
fn grid_step(max: f64, ticks: f64) -> f64 {
    let raw = max / ticks;
    let magnitude = 10f64.powf(raw.log10().floor());
    [1., 2., 5., 10.]
        .into_iter()
        .map(|m| m * magnitude)
        .find(|&step| step >= raw)
        .unwrap_or(10. * magnitude)
}

fn tick_label(value: f64) -> String {
    ((value * 1e6).round() / 1e6).to_string()
}

fn axis_max(values: impl Iterator<Item = f64>) -> f64 {
    let max = values.fold(0., f64::max);
    if max > 0. {
        max * 1.1
    } else {
        1.
    }
}

struct Point<'a> {
    record: &'a AmmoRecord,
    x: f64,
    y: f64,
    damage: Option<f64>,
}

fn hover_text(record: &AmmoRecord) -> String {
    use Column::*;
    let field = |column: Column| format!("{column}: {}", record.display(column));
    [
        record.name.to_string(),
        [PenetrationPower, ArmorDamage, Damage].map(field).join(" "),
        [Accuracy, Recoil].map(field).join(" "),
        [FragmentationChance, RicochetChance].map(field).join(" "),
        [Speed, SpecialEffects].map(field).join(" "),
    ]
    .join("\n")
}

/// The chart for the records of one category.
pub fn category_chart<'a>(
    records: impl IntoIterator<Item = &'a AmmoRecord>,
    catalog: &NameCatalog,
) -> Document {
    let records = records.into_iter().collect_vec();
    // Skipped points still count towards the marker scale.
    let damage_median = median(
        records
            .iter()
            .filter_map(|r| r.damage.as_ref().and_then(|d| d.as_number())),
    )
    .filter(|&m| m > 0.);
    let points = records
        .iter()
        .filter_map(|&record| {
            let x = record.penetration_power.as_ref().and_then(|x| x.as_number());
            let y = record.armor_damage.as_ref().and_then(|y| y.as_number());
            match (x, y) {
                (Some(x), Some(y)) => Some(Point {
                    record,
                    x,
                    y,
                    damage: record.damage.as_ref().and_then(|d| d.as_number()),
                }),
                _ => {
                    warn!(
                        "Skipping {} ({}): penetration or armor damage is not a number",
                        record.name, record.ammo_type
                    );
                    None
                }
            }
        })
        .collect_vec();

    let x_max = axis_max(points.iter().map(|p| p.x));
    let y_max = axis_max(points.iter().map(|p| p.y));
    let x_range = MARGIN..WIDTH - MARGIN;
    let y_range = HEIGHT - MARGIN..MARGIN;
    let x = |v: f64| map_float(v, 0.0..x_max, x_range.clone());
    let y = |v: f64| map_float(v, 0.0..y_max, y_range.clone());

    let mut document = Document::new()
        .set("viewBox", (0, 0, WIDTH, HEIGHT))
        .set("width", "100%")
        .add(
            Rectangle::new()
                .set("width", WIDTH)
                .set("height", HEIGHT)
                .set("fill", PAPER_COLOR),
        )
        .add(
            Rectangle::new()
                .set("x", x_range.start)
                .set("y", y_range.end)
                .set("width", x_range.end - x_range.start)
                .set("height", y_range.start - y_range.end)
                .set("fill", PLOT_COLOR),
        );

    let x_step = grid_step(x_max, 10.);
    for i in 0..=(x_max / x_step).floor() as usize {
        let value = i as f64 * x_step;
        document = document
            .add(
                Line::new()
                    .set("x1", x(value))
                    .set("x2", x(value))
                    .set("y1", y_range.start)
                    .set("y2", y_range.end)
                    .set("stroke", "#fff")
                    .set("stroke-width", 1),
            )
            .add(
                Text::new(tick_label(value))
                    .set("x", x(value))
                    .set("y", y_range.start + 20.)
                    .set("text-anchor", "middle")
                    .set("fill", FONT_COLOR)
                    .set("font-size", 12),
            );
    }
    let y_step = grid_step(y_max, 10.);
    for i in 0..=(y_max / y_step).floor() as usize {
        let value = i as f64 * y_step;
        document = document
            .add(
                Line::new()
                    .set("x1", x_range.start)
                    .set("x2", x_range.end)
                    .set("y1", y(value))
                    .set("y2", y(value))
                    .set("stroke", "#fff")
                    .set("stroke-width", 1),
            )
            .add(
                Text::new(tick_label(value))
                    .set("x", x_range.start - 8.)
                    .set("y", y(value))
                    .set("text-anchor", "end")
                    .set("dominant-baseline", "central")
                    .set("fill", FONT_COLOR)
                    .set("font-size", 12),
            );
    }
    document = document
        .add(
            Text::new(Column::PenetrationPower.to_string())
                .set("x", (x_range.start + x_range.end) / 2.)
                .set("y", HEIGHT - 20.)
                .set("text-anchor", "middle")
                .set("fill", FONT_COLOR)
                .set("font-size", 14),
        )
        .add(
            Text::new(Column::ArmorDamage.to_string())
                .set("text-anchor", "middle")
                .set("fill", FONT_COLOR)
                .set("font-size", 14)
                .set(
                    "transform",
                    format!("translate(20, {}) rotate(-90)", HEIGHT / 2.),
                ),
        );

    for point in &points {
        let size = match (point.damage, damage_median) {
            (Some(damage), Some(median)) => damage / median * BASE_SIZE,
            _ => BASE_SIZE,
        };
        let label = catalog
            .abbreviation(&point.record.name)
            .map(ToString::to_string)
            .unwrap_or_default();
        let (cx, cy) = (x(point.x), y(point.y));
        document = document.add(
            Group::new()
                .set("class", "ammo-point")
                .set("data-info", hover_text(point.record))
                .add(
                    Circle::new()
                        .set("cx", cx)
                        .set("cy", cy)
                        .set("r", size / 2.)
                        .set("fill", "#636efa")
                        .set("fill-opacity", 0.85),
                )
                .add(
                    Text::new(label)
                        .set("x", cx)
                        .set("y", cy - size / 2. - 4.)
                        .set("text-anchor", "middle")
                        .set("fill", PAPER_COLOR)
                        .set("font-size", 12),
                ),
        );
    }
    document
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

const SCRIPT: &str = r#"<script>
(function () {
  var root = document.getElementById("ammo-plot");
  var select = root.querySelector("select");
  var title = root.querySelector(".ammo-plot-title");
  var charts = root.querySelectorAll(".ammo-chart");
  var tooltip = root.querySelector(".ammo-plot-tooltip");
  select.addEventListener("change", function () {
    charts.forEach(function (chart) {
      chart.style.display = chart.dataset.index === select.value ? "block" : "none";
    });
    title.textContent = select.options[select.selectedIndex].text;
  });
  root.querySelectorAll(".ammo-point").forEach(function (point) {
    point.addEventListener("mousemove", function (e) {
      tooltip.textContent = point.getAttribute("data-info");
      tooltip.style.left = e.clientX + 12 + "px";
      tooltip.style.top = e.clientY + 12 + "px";
      tooltip.style.display = "block";
    });
    point.addEventListener("mouseleave", function () {
      tooltip.style.display = "none";
    });
  });
})();
</script>"#;

/// The whole fragment.  Only the first category's chart is visible initially.
pub fn render_fragment(dataset: &Dataset, catalog: &NameCatalog) -> String {
    let categories = dataset.categories();
    let options = categories
        .iter()
        .enumerate()
        .map(|(i, category)| {
            format!(
                r#"<option value="{i}">{}</option>"#,
                escape_html(category.name())
            )
        })
        .join("");
    let charts = categories
        .iter()
        .enumerate()
        .map(|(i, category)| {
            let display = if i == 0 { "block" } else { "none" };
            format!(
                r#"<div class="ammo-chart" data-index="{i}" style="display: {display}">{}</div>"#,
                category_chart(dataset.by_category(category), catalog)
            )
        })
        .join("\n");
    let title = categories
        .first()
        .map(|c| escape_html(c.name()))
        .unwrap_or_default();
    format!(
        r#"<div id="ammo-plot" style="background: {PAPER_COLOR}; color: {FONT_COLOR}">
<select style="background: {FONT_COLOR}; color: {PAPER_COLOR}">{options}</select>
<h2 class="ammo-plot-title">{title}</h2>
{charts}
<div class="ammo-plot-tooltip" style="position: fixed; display: none; white-space: pre; padding: 4px; background: {PAPER_COLOR}; border: 1px solid {FONT_COLOR}"></div>
{SCRIPT}
</div>
"#
    )
}

pub fn write_fragment(
    path: &Path,
    dataset: &Dataset,
    catalog: &NameCatalog,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, render_fragment(dataset, catalog))?;
    info!(
        "Wrote the charts of {} categories to {path:?}",
        dataset.categories().len()
    );
    Ok(())
}
