use chrono::{DateTime, Local, Utc};
use egui::{
    Align, Button, Color32, CornerRadius, Frame, Id, Layout, RichText, ScrollArea, Sense, Ui,
    ViewportCommand,
};
use log::warn;

use crate::{
    live::{
        EventFeed, LiveSession, Notice, NoticeLevel, command::CommandState, session::SessionState,
    },
    records::{EventKind, TelemetrySample, TimedEvent},
    scores,
    ui::{DEFAULT_BUTTON_CORNER_RADIUS, DEFAULT_WINDOW_CORNER_RADIUS, PALETTE_GREY},
};

use super::LiveDashboardApp;

const LIST_HEIGHT: f32 = 220.;

enum Action {
    Back,
    Stop,
    ToggleSort(EventKind),
}

fn local_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M:%S").to_string()
}

impl LiveDashboardApp {
    pub(crate) fn dashboard_view(&mut self, ctx: &egui::Context) {
        let mut actions = Vec::new();

        egui::TopBottomPanel::top("header")
            .min_height(40.)
            .frame(Frame::new().inner_margin(egui::Margin::same(6)).corner_radius(
                CornerRadius {
                    nw: DEFAULT_WINDOW_CORNER_RADIUS,
                    ne: DEFAULT_WINDOW_CORNER_RADIUS,
                    ..Default::default()
                },
            ))
            .show(ctx, |ui| {
                let drag_sense = ui.interact(ui.max_rect(), Id::new("window-drag"), Sense::drag());
                if drag_sense.dragged() {
                    ui.ctx().send_viewport_cmd(ViewportCommand::StartDrag);
                }
                if drag_sense.drag_stopped()
                    && let Some(outer_rect) = ui.input(|is| is.viewport().outer_rect)
                {
                    self.app_config.window_position = outer_rect.min.into();
                }
                header(ui, &self.live, &mut actions);
            });

        egui::CentralPanel::default()
            .frame(Frame::new().inner_margin(egui::Margin::same(10)).corner_radius(
                CornerRadius {
                    sw: DEFAULT_WINDOW_CORNER_RADIUS,
                    se: DEFAULT_WINDOW_CORNER_RADIUS,
                    ..Default::default()
                },
            ))
            .show(ctx, |ui| match self.live.session_state() {
                SessionState::Resolving => {
                    ui.vertical_centered(|ui| {
                        ui.add_space(40.);
                        ui.spinner();
                        ui.label("Looking up the latest session...");
                    });
                }
                SessionState::NotFound | SessionState::Failed(_) => {
                    no_session(ui, self.live.session_state());
                }
                SessionState::Ready(_) => {
                    telemetry_panel(ui, self.live.latest_sample());
                    ui.add_space(10.);
                    ui.columns(2, |columns| {
                        event_list(&mut columns[0], self.live.potholes(), &mut actions, |ui, p| {
                            ui.label(local_time(&p.detected_at));
                            ui.label(RichText::new(&p.id).small().color(PALETTE_GREY));
                        });
                        event_list(&mut columns[1], self.live.ride_events(), &mut actions, |ui, e| {
                            ui.label(RichText::new(&e.event_type).strong());
                            ui.label(format!(
                                "{} - {}",
                                local_time(&e.start_time),
                                local_time(&e.end_time)
                            ));
                            ui.label(format!(
                                "{:.0}% / {:.1}s",
                                e.confidence_percent, e.duration_seconds
                            ));
                        });
                    });
                }
            });

        for action in actions {
            match action {
                Action::Back => self.leave(ctx),
                Action::Stop => {
                    if let Err(e) = self.live.stop() {
                        warn!("{e}");
                        self.toasts.push(Notice {
                            level: NoticeLevel::Error,
                            text: e.to_string(),
                        });
                    }
                }
                Action::ToggleSort(kind) => self.live.toggle_sort(kind),
            }
        }
    }
}

fn header(ui: &mut Ui, live: &LiveSession, actions: &mut Vec<Action>) {
    ui.with_layout(Layout::left_to_right(Align::Center), |ui| {
        if ui
            .add(Button::new("Back").corner_radius(DEFAULT_BUTTON_CORNER_RADIUS))
            .clicked()
        {
            actions.push(Action::Back);
        }
        ui.add_space(10.);
        ui.heading(RichText::new(live.rider_label()).color(Color32::WHITE));
        if let Some(session) = live.session_state().session() {
            ui.label(RichText::new(&session.session_id).small().color(PALETTE_GREY));
        }

        ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
            let (label, status, color) = match live.command_state() {
                CommandState::Active => ("Stop ride", "Active", scores::GREEN),
                CommandState::Stopping => ("Stopping...", "Active", scores::AMBER),
                CommandState::Stopped { .. } => ("Stopped", "Stopped", scores::RED),
            };
            let stop = Button::new(RichText::new(label).color(Color32::WHITE))
                .fill(scores::RED)
                .corner_radius(DEFAULT_BUTTON_CORNER_RADIUS);
            if ui.add_enabled(live.can_stop(), stop).clicked() {
                actions.push(Action::Stop);
            }
            ui.label(RichText::new(status).color(color));
        });
    });
}

fn no_session(ui: &mut Ui, state: &SessionState) {
    ui.vertical_centered(|ui| {
        ui.add_space(40.);
        ui.heading("No active session");
        ui.label("This rider has no uploaded session to follow.");
        if let SessionState::Failed(reason) = state {
            ui.add_space(6.);
            ui.label(RichText::new(reason).small().color(scores::RED));
        }
    });
}

fn telemetry_panel(ui: &mut Ui, sample: Option<&TelemetrySample>) {
    ui.heading("Telemetry");
    let Some(sample) = sample else {
        ui.label(RichText::new("Waiting for telemetry...").color(PALETTE_GREY));
        return;
    };

    egui::Grid::new("telemetry")
        .num_columns(4)
        .spacing([20., 4.])
        .show(ui, |ui| {
            ui.label("Accel (m/s²)");
            ui.label(format!("x {:.2}", sample.ax));
            ui.label(format!("y {:.2}", sample.ay));
            ui.label(format!("z {:.2}", sample.az));
            ui.end_row();

            ui.label("Gyro (rad/s)");
            ui.label(format!("x {:.2}", sample.gx));
            ui.label(format!("y {:.2}", sample.gy));
            ui.label(format!("z {:.2}", sample.gz));
            ui.end_row();

            ui.label("Speed");
            ui.label(format!("{:.1} km/h", sample.speed_kmh()));
            match sample.position() {
                Some((lat, lon)) => {
                    ui.label(format!("{lat:.5}"));
                    ui.label(format!("{lon:.5}"));
                }
                None => {
                    ui.label("no GPS fix");
                }
            }
            ui.end_row();
        });
}

fn event_list<T: TimedEvent>(
    ui: &mut Ui,
    feed: &EventFeed<T>,
    actions: &mut Vec<Action>,
    row: impl Fn(&mut Ui, &T),
) {
    ui.horizontal(|ui| {
        ui.heading(T::KIND.label());
        ui.label(RichText::new(format!("({})", feed.len())).color(PALETTE_GREY));
        if feed.is_loading() {
            ui.spinner();
        }
        ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
            if ui
                .add(Button::new(feed.order().label()).corner_radius(DEFAULT_BUTTON_CORNER_RADIUS))
                .clicked()
            {
                actions.push(Action::ToggleSort(T::KIND));
            }
        });
    });
    if !feed.is_live() {
        ui.label(RichText::new("Not live, showing last snapshot").small().color(scores::AMBER));
    }
    if let Some(notice) = feed.notice() {
        ui.label(RichText::new(notice).small().color(scores::RED));
    }

    if feed.is_empty() {
        if !feed.is_loading() {
            ui.label(RichText::new("Nothing recorded yet").color(PALETTE_GREY));
        }
        return;
    }

    ScrollArea::vertical()
        .id_salt(T::KIND.label())
        .max_height(LIST_HEIGHT)
        .show(ui, |ui| {
            for item in feed.items() {
                ui.group(|ui| {
                    ui.set_width(ui.available_width());
                    row(ui, item);
                });
            }
        });
}
