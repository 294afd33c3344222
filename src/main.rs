use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result, eyre};
use eframe::egui;
use tracing::{error, info, warn};

use tris::config::Settings;
use tris::game::searcher::Difficulty;
use tris::game::{Board, CELLS, Mark, Score};
use tris::lobby::Lobby;
use tris::online::{Joined, MoveOutcome, OnlineGame, Role, Update};
use tris::record::{GameId, Identity};
use tris::session::{Applied, Mode, Session, TurnController};
use tris::store::MemoryStore;
use tris::thinker::Thinker;
use tris::view::{Surface, View};

const REPAINT_EVERY: Duration = Duration::from_millis(100);

enum Screen {
    ModeSelect,
    Local(TurnController),
    Online(OnlineTable),
}

struct App {
    settings: Settings,
    screen: Screen,
    thinker: Thinker,
    notice: Option<String>,
}

/// Local identities sharing one in-process store: two players and a
/// spectator, each with its own lobby or game.
struct OnlineTable {
    store: Arc<MemoryStore>,
    participants: Vec<Participant>,
    selected: usize,
}

struct Participant {
    me: Identity,
    place: Place,
    game_name: String,
    private: bool,
    join_id: String,
    chat_draft: String,
}

enum Place {
    Lobby(Lobby),
    Playing(OnlineGame<MemoryStore>),
}

enum Action {
    Create,
    Join(GameId),
    Rematch,
    Chat,
    Leave,
}

impl App {
    fn new(settings: Settings) -> Self {
        Self {
            settings,
            screen: Screen::ModeSelect,
            thinker: Thinker::spawn(),
            notice: None,
        }
    }

    fn enter(&mut self, mode: Mode) {
        info!("mode" = ?mode, "mode_entered");
        match mode {
            Mode::LocalDuel | Mode::LocalVsEngine => self.start_local(mode),
            Mode::Networked => {
                if let Err(err) = self.start_online() {
                    self.notice = Some(format!("Could not open the lobby: {err}"));
                }
            }
        }
    }

    fn start_local(&mut self, mode: Mode) {
        let session = Session::new(
            mode,
            self.settings.player_names.clone(),
            self.settings.difficulty,
        );
        self.screen = Screen::Local(TurnController::new(session, self.settings.thinking_delay()));
    }

    fn start_online(&mut self) -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let names = [
            self.settings.display_name.clone(),
            self.settings.player_names[1].clone(),
            "Spectator".to_owned(),
        ];
        let participants = names
            .into_iter()
            .map(|name| {
                let me = Identity::anonymous(name);
                let lobby = Lobby::listen(store.as_ref(), me.id.clone())?;
                Ok(Participant {
                    game_name: format!("{}'s game", me.name),
                    me,
                    place: Place::Lobby(lobby),
                    private: false,
                    join_id: String::new(),
                    chat_draft: String::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.screen = Screen::Online(OnlineTable {
            store,
            participants,
            selected: 0,
        });
        Ok(())
    }

    /// Feeds engine replies and subscription traffic into the current screen.
    fn pump(&mut self) {
        match &mut self.screen {
            Screen::Local(controller) => {
                while let Some(reply) = self.thinker.try_reply() {
                    let _span = tracing::debug_span!("computer_move", "reply" = ?reply).entered();
                    if let Applied::Rejected = controller.apply_engine_move(reply) {
                        warn!("computer_move_dropped");
                    }
                }
            }
            Screen::Online(table) => {
                for participant in &mut table.participants {
                    if let Some(notice) = participant.pump(&table.store) {
                        self.notice = Some(notice);
                    }
                }
            }
            Screen::ModeSelect => {}
        }
    }
}

impl Participant {
    fn pump(&mut self, store: &Arc<MemoryStore>) -> Option<String> {
        let notice = match &mut self.place {
            Place::Lobby(lobby) => {
                lobby.refresh();
                return None;
            }
            Place::Playing(game) => match game.poll() {
                Some(Update::GameEnded) => {
                    format!("{}: the game you were in has ended.", self.me.name)
                }
                Some(Update::Disconnected) => format!(
                    "{}: disconnected from game {}. Rejoin with the same id.",
                    self.me.name,
                    game.id()
                ),
                Some(Update::Changed) | None => return None,
            },
        };
        self.back_to_lobby(store);
        Some(notice)
    }

    fn back_to_lobby(&mut self, store: &Arc<MemoryStore>) {
        match Lobby::listen(store.as_ref(), self.me.id.clone()) {
            Ok(lobby) => self.place = Place::Lobby(lobby),
            Err(err) => error!("error" = %err, "lobby_unavailable"),
        }
    }

    fn act(&mut self, action: Action, store: &Arc<MemoryStore>) -> Result<Option<String>> {
        match action {
            Action::Create => {
                let game = OnlineGame::create(
                    store.clone(),
                    self.me.clone(),
                    &self.game_name,
                    self.private,
                )?;
                let notice = format!("Game created! Share this id: {}", game.id());
                self.place = Place::Playing(game);
                Ok(Some(notice))
            }
            Action::Join(id) => {
                let (game, joined) = OnlineGame::join(store.clone(), self.me.clone(), id)?;
                self.place = Place::Playing(game);
                Ok(match joined {
                    Joined::SeatTaken => Some("The seat was taken first; you are spectating.".into()),
                    Joined::Spectating => Some("The game is full; you are spectating.".into()),
                    Joined::Resumed(_) | Joined::Seated(_) => None,
                })
            }
            Action::Rematch => {
                if let Place::Playing(game) = &mut self.place {
                    game.request_rematch()?;
                }
                Ok(None)
            }
            Action::Chat => {
                if let Place::Playing(game) = &self.place {
                    game.send_chat(&self.chat_draft)?;
                }
                self.chat_draft.clear();
                Ok(None)
            }
            Action::Leave => {
                let lobby = Lobby::listen(store.as_ref(), self.me.id.clone())?;
                if let Place::Playing(game) = std::mem::replace(&mut self.place, Place::Lobby(lobby)) {
                    game.leave()?;
                }
                Ok(None)
            }
        }
    }
}

#[derive(Clone, Copy)]
struct GridHelper {
    rect: egui::Rect,
}

impl GridHelper {
    fn new(screen: egui::Rect) -> Self {
        let square_size = screen.width().min(screen.height());
        let rect =
            egui::Rect::from_center_size(screen.center(), egui::vec2(square_size, square_size));
        Self { rect }
    }

    fn position(&self, row: u8, col: u8) -> egui::Pos2 {
        let x = self.rect.left() + self.rect.width() / 3.0 * col as f32 + self.rect.width() / 6.0;
        let y = self.rect.top() + self.rect.height() / 3.0 * row as f32 + self.rect.height() / 6.0;
        egui::pos2(x, y)
    }

    fn square_size(&self) -> f32 {
        self.rect.width() / 3.0
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_thread_ids(true))
        .with(
            tracing_subscriber::filter::Targets::new()
                .with_target("tris", tracing::Level::TRACE)
                .with_default(tracing::Level::INFO),
        )
        .try_init()?;

    let settings = Settings::load()?;
    info!("settings" = ?settings, "settings_loaded");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([760.0, 540.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Tris",
        options,
        Box::new(move |_cc| Ok(Box::new(App::new(settings)))),
    )
    .map_err(|e| eyre!("{e:?}"))?;
    Ok(())
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.pump();

        egui::SidePanel::left("side_panel").show(ctx, |ui| {
            ui.heading("Tris");
            ui.label("Three in a row, alone, with a friend or online.");
            ui.separator();
            side_panel(ui, self);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            draw_game(ui, self);
        });

        if let Some(notice) = self.notice.clone() {
            egui::Modal::new("notice_modal".into()).show(ctx, |ui| {
                ui.vertical_centered(|ui| {
                    ui.label(notice);
                    if ui.button("OK").clicked() {
                        self.notice = None;
                    }
                });
            });
        }

        ctx.request_repaint_after(REPAINT_EVERY);
    }
}

fn side_panel(ui: &mut egui::Ui, app: &mut App) {
    let mut next_mode = None;

    match &mut app.screen {
        Screen::ModeSelect => {
            for (mode, label) in [
                (Mode::LocalDuel, "Hot seat"),
                (Mode::LocalVsEngine, "Against the computer"),
                (Mode::Networked, "Online"),
            ] {
                if ui.button(label).clicked() {
                    next_mode = Some(mode);
                }
            }
        }
        Screen::Local(controller) => {
            if controller.session().mode == Mode::LocalVsEngine {
                let mut difficulty = controller.session().difficulty;
                egui::ComboBox::from_label("Difficulty")
                    .selected_text(difficulty.to_string())
                    .show_ui(ui, |ui| {
                        for choice in Difficulty::ALL {
                            ui.selectable_value(&mut difficulty, choice, choice.to_string());
                        }
                    });
                controller.set_difficulty(difficulty);
            }
            let session = controller.session();
            ui.label(format!("X: {}", session.names[0]));
            ui.label(format!("O: {}", session.names[1]));
            if ui.button("Rematch").clicked() {
                controller.reset(true);
            }
            if ui.button("Reset score").clicked() {
                controller.reset(false);
            }
        }
        Screen::Online(table) => {
            if let Some(notice) = online_panel(ui, table) {
                app.notice = Some(notice);
            }
        }
    }

    ui.separator();
    if !matches!(app.screen, Screen::ModeSelect) && ui.button("Back to mode selection").clicked() {
        app.screen = Screen::ModeSelect;
    }

    if let Some(mode) = next_mode {
        app.enter(mode);
    }
}

fn online_panel(ui: &mut egui::Ui, table: &mut OnlineTable) -> Option<String> {
    ui.horizontal(|ui| {
        for (i, participant) in table.participants.iter().enumerate() {
            ui.selectable_value(&mut table.selected, i, participant.me.name.as_str());
        }
    });
    ui.separator();

    let participant = table.participants.get_mut(table.selected)?;
    let mut action = None;

    match &participant.place {
        Place::Lobby(lobby) => {
            ui.label("Open games");
            for game in lobby.games() {
                ui.horizontal(|ui| {
                    ui.label(format!("{} ({})", game.name, game.host));
                    let verb = if game.seat_open { "Join" } else { "Watch" };
                    if ui.button(verb).clicked() {
                        action = Some(Action::Join(game.id.clone()));
                    }
                });
            }
            ui.separator();
            ui.text_edit_singleline(&mut participant.game_name);
            ui.checkbox(&mut participant.private, "Private");
            if ui.button("Create game").clicked() {
                action = Some(Action::Create);
            }
            ui.separator();
            ui.text_edit_singleline(&mut participant.join_id);
            if ui.button("Join by id").clicked() && !participant.join_id.trim().is_empty() {
                action = Some(Action::Join(GameId::from(participant.join_id.as_str())));
            }
        }
        Place::Playing(game) => {
            ui.label(format!("Game id: {}", game.id()));
            ui.label(match game.role() {
                Role::Player(mark) => format!("You play {mark}"),
                Role::Spectator => "You are spectating".to_owned(),
            });
            if let Some(record) = game.record() {
                let other = record
                    .mark_o
                    .as_ref()
                    .map_or("Player O", |seat| seat.name.as_str());
                ui.label(format!("X: {}", record.mark_x.name));
                ui.label(format!("O: {other}"));
                if record.outcome.is_some()
                    && matches!(game.role(), Role::Player(_))
                    && ui.button("Rematch").clicked()
                {
                    action = Some(Action::Rematch);
                }
            }
            if ui.button("Leave").clicked() {
                action = Some(Action::Leave);
            }

            ui.separator();
            egui::ScrollArea::vertical()
                .max_height(160.0)
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for message in game.messages() {
                        ui.label(format!("{}: {}", message.sender_name, message.text));
                    }
                });
            ui.horizontal(|ui| {
                ui.text_edit_singleline(&mut participant.chat_draft);
                if ui.button("Send").clicked() {
                    action = Some(Action::Chat);
                }
            });
        }
    }

    let action = action?;
    match participant.act(action, &table.store) {
        Ok(notice) => notice,
        Err(err) => {
            error!("error" = %err, "online_action_failed");
            Some(format!("{err}"))
        }
    }
}

fn draw_game(ui: &mut egui::Ui, app: &mut App) {
    match &mut app.screen {
        Screen::ModeSelect => {
            ui.vertical_centered(|ui| {
                ui.heading("Pick a mode on the left");
            });
        }
        Screen::Local(controller) => {
            if controller.is_thinking() {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label("Thinking...");
                });
            }
            let view = controller.view();
            if let Some(cell) = draw_view(ui, &view) {
                match controller.apply_move(cell) {
                    Applied::EngineToMove(request) => {
                        info!("cell" = cell, "player_move_done");
                        if !app.thinker.request(request) {
                            error!("thinker_gone");
                        }
                    }
                    Applied::Rejected => {}
                    Applied::Continue | Applied::Finished(_) => {
                        info!("cell" = cell, "player_move_done");
                    }
                }
            }
        }
        Screen::Online(table) => {
            let Some(participant) = table.participants.get_mut(table.selected) else {
                return;
            };
            let Place::Playing(game) = &mut participant.place else {
                ui.vertical_centered(|ui| {
                    ui.heading("Create or join a game on the left");
                });
                return;
            };
            let Some(view) = game.view() else {
                return;
            };
            if let Some(cell) = draw_view(ui, &view) {
                match game.submit_move(cell) {
                    Ok(MoveOutcome::Accepted) => info!("cell" = cell, "player_move_done"),
                    Ok(MoveOutcome::Rejected(why)) => info!("cell" = cell, "why" = ?why, "player_move_rejected"),
                    Err(err) => app.notice = Some(format!("{err}")),
                }
            }
        }
    }
}

/// Draws status, score and board; returns the cell clicked, if it accepts clicks.
fn draw_view(ui: &mut egui::Ui, view: &View) -> Option<u8> {
    let mut surface = EguiSurface {
        ui,
        board: Board::default(),
        highlight: Vec::new(),
        clicked: None,
    };
    view.render_to(&mut surface);
    surface.clicked
}

/// Paints into the central panel. The grid itself is drawn once the
/// interactive cells are known, which is the last callback of a render.
struct EguiSurface<'a> {
    ui: &'a mut egui::Ui,
    board: Board,
    highlight: Vec<u8>,
    clicked: Option<u8>,
}

impl Surface for EguiSurface<'_> {
    fn render_board(&mut self, board: &Board) {
        self.board = *board;
    }

    fn render_status(&mut self, status: &str) {
        self.ui.heading(status);
    }

    fn render_score(&mut self, score: Score) {
        self.ui.label(format!(
            "X {}   O {}   draws {}",
            score.wins_x, score.wins_o, score.draws
        ));
        self.ui.separator();
    }

    fn highlight_cells(&mut self, cells: &[u8]) {
        self.highlight = cells.to_vec();
    }

    fn set_interactive(&mut self, cells: [bool; CELLS]) {
        let ui = &mut *self.ui;
        let gh = GridHelper::new(ui.available_rect_before_wrap());
        draw_grid_lines(ui, gh, cells.iter().any(|&cell| cell));

        for cell in 0..CELLS as u8 {
            let lit = self.highlight.contains(&cell);
            let response = draw_grid_item(ui, gh, cell / 3, cell % 3, self.board.get(cell), lit);
            if response.clicked() && cells[cell as usize] {
                self.clicked = Some(cell);
            }
        }
    }
}

fn draw_grid_item(
    ui: &mut egui::Ui,
    gh: GridHelper,
    row: u8,
    col: u8,
    square: Option<Mark>,
    lit: bool,
) -> egui::Response {
    let painter = ui.painter();

    let egui::Pos2 { x, y } = gh.position(row, col);
    let radius = gh.square_size() / 2.0 * 0.7;

    if let Some(square) = square {
        draw_mark(painter, x, y, radius, square, lit);
    }

    ui.interact(
        egui::Rect::from_center_size(egui::pos2(x, y), egui::vec2(radius * 2.0, radius * 2.0)),
        ui.id().with((x as u32, y as u32)),
        egui::Sense::click(),
    )
}

fn draw_mark(painter: &egui::Painter, x: f32, y: f32, radius: f32, square: Mark, lit: bool) {
    let color = match (square, lit) {
        (_, true) => egui::Color32::GOLD,
        (Mark::X, false) => egui::Color32::RED,
        (Mark::O, false) => egui::Color32::BLUE,
    };
    let stroke = egui::Stroke::new(if lit { 4.0 } else { 2.0 }, color);

    match square {
        Mark::X => {
            painter.line_segment(
                [
                    egui::pos2(x - radius, y - radius),
                    egui::pos2(x + radius, y + radius),
                ],
                stroke,
            );
            painter.line_segment(
                [
                    egui::pos2(x + radius, y - radius),
                    egui::pos2(x - radius, y + radius),
                ],
                stroke,
            );
        }
        Mark::O => {
            painter.circle(
                egui::Pos2 { x, y },
                radius,
                egui::Color32::TRANSPARENT,
                stroke,
            );
        }
    }
}

fn draw_grid_lines(ui: &mut egui::Ui, gh: GridHelper, highlight: bool) {
    let painter = ui.painter();

    let stroke = egui::Stroke::new(1.0, egui::Color32::LIGHT_GRAY);
    let cell = gh.rect.width() / 3.0;

    if highlight {
        painter.rect(
            gh.rect.shrink(-4.0),
            3.0,
            egui::Color32::TRANSPARENT,
            egui::Stroke::new(4.0, egui::Color32::GREEN),
            egui::StrokeKind::Outside,
        );
    }

    for i in 1..3 {
        let x = gh.rect.left() + i as f32 * cell;
        painter.line_segment(
            [
                egui::pos2(x, gh.rect.top()),
                egui::pos2(x, gh.rect.bottom()),
            ],
            stroke,
        );
        let y = gh.rect.top() + i as f32 * cell;
        painter.line_segment(
            [
                egui::pos2(gh.rect.left(), y),
                egui::pos2(gh.rect.right(), y),
            ],
            stroke,
        );
    }
}
