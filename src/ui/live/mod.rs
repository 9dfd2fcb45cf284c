mod dashboard_view;

use std::time::{Duration, Instant};

use egui::ViewportCommand;
use log::{error, info};

use crate::{config::AppConfig, live::LiveSession};

use super::{Toasts, dark_visuals};

const REFRESH_RATE_MS: u64 = 100;

/// Window showing one rider's live session: telemetry, pothole and ride
/// event lists, and the stop control.
pub struct LiveDashboardApp {
    live: LiveSession,
    app_config: AppConfig,
    toasts: Toasts,
}

impl LiveDashboardApp {
    pub fn new(live: LiveSession, app_config: AppConfig, cc: &eframe::CreationContext<'_>) -> Self {
        cc.egui_ctx.set_visuals(dark_visuals());
        Self {
            live,
            app_config,
            toasts: Toasts::default(),
        }
    }

    fn leave(&mut self, ctx: &egui::Context) {
        self.live.unmount();
        ctx.send_viewport_cmd(ViewportCommand::Close);
    }
}

impl eframe::App for LiveDashboardApp {
    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.live.unmount();
        if let Err(e) = self.app_config.save() {
            error!("Error while saving config file: {}", e);
        }
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.live.pump();
        for notice in self.live.take_notices() {
            self.toasts.push(notice);
        }

        if self.live.is_mounted() && self.live.should_navigate_away(Instant::now()) {
            info!("Rider {} stopped, leaving live view", self.live.rider_id());
            self.leave(ctx);
        }

        self.dashboard_view(ctx);
        self.toasts.show(ctx);

        // feeds are polled, so keep pumping even without input
        ctx.request_repaint_after(Duration::from_millis(REFRESH_RATE_MS));
    }
}
