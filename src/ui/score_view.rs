use std::f32::consts::PI;

use egui::{
    Align2, Color32, CornerRadius, FontId, Pos2, Rect, Sense, Shape, Stroke, Ui, Vec2, pos2, vec2,
};

use crate::scores::{MAX_SCORE, ScoreCard};

use super::{PALETTE_GREY, PALETTE_SLATE, dark_visuals, stroke_shade};

const GAUGE_SIZE: f32 = 180.;
const GAUGE_WIDTH: f32 = 14.;
const CHART_SIZE: f32 = 240.;
const RADAR_RINGS: usize = 5;

/// Window rendering a [`ScoreCard`]: a gauge for the overall score, bars and
/// a radar of the sub-metrics.
pub struct ScoreCardApp {
    card: ScoreCard,
}

impl ScoreCardApp {
    pub fn new(card: ScoreCard, cc: &eframe::CreationContext<'_>) -> Self {
        cc.egui_ctx.set_visuals(dark_visuals());
        Self { card }
    }
}

impl eframe::App for ScoreCardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.heading("Safety score");
                gauge(ui, &self.card);
                ui.label(
                    egui::RichText::new(self.card.tier.label())
                        .strong()
                        .color(self.card.tier.color()),
                );
            });
            ui.separator();
            ui.horizontal(|ui| {
                bars(ui, &self.card);
                radar(ui, &self.card);
            });
        });
    }
}

fn arc_points(center: Pos2, radius: f32, start: f32, sweep: f32) -> Vec<Pos2> {
    let steps = ((sweep.abs() / (2. * PI)) * 64.).ceil().max(2.) as usize;
    (0..=steps)
        .map(|i| {
            let angle = start + sweep * i as f32 / steps as f32;
            pos2(center.x + radius * angle.cos(), center.y + radius * angle.sin())
        })
        .collect()
}

/// Ring filled clockwise from the top in proportion to the percentage.
fn gauge(ui: &mut Ui, card: &ScoreCard) {
    let (response, painter) = ui.allocate_painter(Vec2::splat(GAUGE_SIZE), Sense::hover());
    let center = response.rect.center();
    let radius = GAUGE_SIZE / 2. - GAUGE_WIDTH;

    painter.circle_stroke(center, radius, Stroke::new(GAUGE_WIDTH, PALETTE_SLATE));
    let fraction = (card.percentage / 100.) as f32;
    if fraction > 0. {
        painter.add(Shape::line(
            arc_points(center, radius, -PI / 2., 2. * PI * fraction),
            Stroke::new(GAUGE_WIDTH, card.tier.color()),
        ));
    }
    painter.text(
        center,
        Align2::CENTER_CENTER,
        format!("{:.1}", card.overall),
        FontId::proportional(36.),
        Color32::WHITE,
    );
    painter.text(
        center + vec2(0., 28.),
        Align2::CENTER_CENTER,
        format!("{:.0}%", card.percentage),
        FontId::proportional(14.),
        PALETTE_GREY,
    );
}

fn bars(ui: &mut Ui, card: &ScoreCard) {
    let (response, painter) = ui.allocate_painter(Vec2::splat(CHART_SIZE), Sense::hover());
    let rect = response.rect;
    let label_width = 110.;
    let row_height = rect.height() / card.metrics.len().max(1) as f32;
    let track_width = rect.width() - label_width - 30.;

    for (i, metric) in card.metrics.iter().enumerate() {
        let top = rect.top() + row_height * i as f32 + row_height * 0.25;
        let track = Rect::from_min_size(
            pos2(rect.left() + label_width, top),
            vec2(track_width, row_height * 0.5),
        );
        painter.text(
            pos2(rect.left(), track.center().y),
            Align2::LEFT_CENTER,
            metric.label,
            FontId::proportional(12.),
            PALETTE_GREY,
        );
        painter.rect_filled(track, CornerRadius::same(3), PALETTE_SLATE);
        let filled = Rect::from_min_size(
            track.min,
            vec2(track.width() * (metric.value / MAX_SCORE) as f32, track.height()),
        );
        painter.rect_filled(filled, CornerRadius::same(3), metric.color);
        painter.text(
            pos2(track.right() + 6., track.center().y),
            Align2::LEFT_CENTER,
            format!("{:.1}", metric.value),
            FontId::proportional(12.),
            Color32::WHITE,
        );
    }
}

fn radar(ui: &mut Ui, card: &ScoreCard) {
    let (response, painter) = ui.allocate_painter(Vec2::splat(CHART_SIZE), Sense::hover());
    let center = response.rect.center();
    let radius = CHART_SIZE / 2. - 30.;
    let vertices = card.radar_vertices();
    if vertices.is_empty() {
        return;
    }

    for ring in 1..=RADAR_RINGS {
        let reach = ring as f32 / RADAR_RINGS as f32;
        let mut outline: Vec<Pos2> = vertices
            .iter()
            .map(|v| {
                let mut spoke = *v;
                spoke.reach = reach;
                spoke.to_point(center, radius)
            })
            .collect();
        if let Some(first) = outline.first().copied() {
            outline.push(first);
        }
        painter.add(Shape::line(outline, Stroke::new(1., PALETTE_SLATE)));
    }

    for (vertex, metric) in vertices.iter().zip(&card.metrics) {
        let mut spoke = *vertex;
        spoke.reach = 1.;
        let end = spoke.to_point(center, radius);
        painter.line_segment([center, end], Stroke::new(1., PALETTE_SLATE));
        spoke.reach = 1.15;
        painter.text(
            spoke.to_point(center, radius),
            Align2::CENTER_CENTER,
            metric.label,
            FontId::proportional(11.),
            metric.color,
        );
    }

    let points: Vec<Pos2> = vertices.iter().map(|v| v.to_point(center, radius)).collect();
    let tier_color = card.tier.color();
    let fill = stroke_shade(PALETTE_SLATE, tier_color, 0.5).gamma_multiply(0.6);
    // the outline is not always convex, fill it as a fan from the center
    for (i, point) in points.iter().enumerate() {
        let next = points[(i + 1) % points.len()];
        painter.add(Shape::convex_polygon(
            vec![center, *point, next],
            fill,
            Stroke::NONE,
        ));
    }
    let mut outline = points.clone();
    outline.push(points[0]);
    painter.add(Shape::line(outline, Stroke::new(2., tier_color)));
    for (point, metric) in points.iter().zip(&card.metrics) {
        painter.circle_filled(*point, 3., metric.color);
    }
}
