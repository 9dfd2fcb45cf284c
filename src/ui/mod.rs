use std::time::{Duration, Instant};

use egui::{Align2, Color32, CornerRadius, Frame, RichText, Visuals, style::Widgets};

use crate::{
    live::{Notice, NoticeLevel},
    scores,
};

pub mod live;
pub mod score_view;

pub use live::LiveDashboardApp;
pub use score_view::ScoreCardApp;

pub(crate) const PALETTE_BLACK: Color32 = Color32::from_rgb(12, 12, 12);
pub(crate) const PALETTE_SLATE: Color32 = Color32::from_rgb(30, 41, 59);
pub(crate) const PALETTE_GREY: Color32 = Color32::from_rgb(148, 163, 184);

pub(crate) const DEFAULT_BUTTON_CORNER_RADIUS: u8 = 4;
pub(crate) const DEFAULT_WINDOW_CORNER_RADIUS: u8 = 10;

const TOAST_DURATION: Duration = Duration::from_secs(4);
const MAX_TOASTS: usize = 5;

pub(crate) fn dark_visuals() -> Visuals {
    Visuals {
        dark_mode: true,
        faint_bg_color: PALETTE_SLATE,
        extreme_bg_color: PALETTE_SLATE,
        panel_fill: PALETTE_BLACK,
        window_fill: PALETTE_BLACK,
        button_frame: true,
        widgets: Widgets::dark(),
        striped: true,
        ..Default::default()
    }
}

/// Linear blend between two colors, `t` in 0..=1.
pub(crate) fn stroke_shade(start: Color32, end: Color32, t: f32) -> Color32 {
    let t = t.clamp(0., 1.);
    let blend = |a: u8, b: u8| (a as f32 + t * (b as f32 - a as f32)).round().clamp(0., 255.) as u8;
    Color32::from_rgb(
        blend(start.r(), end.r()),
        blend(start.g(), end.g()),
        blend(start.b(), end.b()),
    )
}

/// Short-lived messages stacked in the bottom right corner.
#[derive(Default)]
pub(crate) struct Toasts {
    shown: Vec<(Notice, Instant)>,
}

impl Toasts {
    pub(crate) fn push(&mut self, notice: Notice) {
        self.shown.push((notice, Instant::now() + TOAST_DURATION));
        if self.shown.len() > MAX_TOASTS {
            self.shown.remove(0);
        }
    }

    pub(crate) fn show(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        self.shown.retain(|(_, until)| *until > now);
        if self.shown.is_empty() {
            return;
        }

        egui::Area::new(egui::Id::new("toasts"))
            .anchor(Align2::RIGHT_BOTTOM, [-10., -10.])
            .show(ctx, |ui| {
                for (notice, _) in &self.shown {
                    let color = match notice.level {
                        NoticeLevel::Info => scores::GREEN,
                        NoticeLevel::Error => scores::RED,
                    };
                    Frame::new()
                        .fill(PALETTE_SLATE)
                        .corner_radius(CornerRadius::same(DEFAULT_BUTTON_CORNER_RADIUS))
                        .inner_margin(egui::Margin::same(8))
                        .show(ui, |ui| {
                            ui.label(RichText::new(&notice.text).color(color));
                        });
                    ui.add_space(4.);
                }
            });
    }
}
