//! Client orchestrator: joins the game, then drives the session controller
//! and stdin from one event loop.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use trivia_client::api::{GameService, HttpGameService};
use trivia_client::client_controller::{ClientController, PollResult};
use trivia_client::config::ClientConfig;
use trivia_client::dispatcher::{SessionEnd, UserAction};
use trivia_client::error::{ApiError, ClientError};
use trivia_client::phase::Phase;
use trivia_client::session::{FileSessionStore, StateChanged};
use trivia_client::supervisor::WsConnector;

use crate::view::{self, Command};

type Controller = ClientController<WsConnector, FileSessionStore>;

/// What the loop does after a command.
#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Resume the saved session, or join `game` (a new one when `None`), then
/// run until the participant quits or the session ends.
pub async fn start_client(
    config: ClientConfig,
    game: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let api = HttpGameService::new(
        &config.api_url,
        config.access_token.as_deref(),
        config.team_id,
    )?;
    let connector = WsConnector::new(config.ws_url.clone(), config.access_token.clone());
    let store = FileSessionStore::new(config.state_path.clone());
    let mut ctrl = ClientController::new(&config, connector, store);

    if ctrl.restore()? {
        let game_id = ctrl.session().game_id.clone().unwrap_or_default();
        if let Some(requested) = game.as_deref()
            && requested != game_id
        {
            println!("Ignoring --game {requested}: resuming saved game {game_id}");
        } else {
            println!("Resuming game {game_id}");
        }
        ctrl.start();
    } else {
        let game_id = match api.join(game.as_deref()).await {
            Ok(id) => id,
            Err(ApiError::Unauthorized) => return Err(ClientError::SessionExpired.into()),
            Err(e) => return Err(e.into()),
        };
        println!("Joined game {game_id}");
        ctrl.act(UserAction::Join { game_id })?;
    }
    println!("{}", view::status_line(ctrl.session(), ctrl.show_scores()));
    println!("Type help for commands.");

    run_event_loop(&mut ctrl, &api).await
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

async fn run_event_loop(
    ctrl: &mut Controller,
    api: &HttpGameService,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            poll = ctrl.next() => match poll? {
                PollResult::Updated(changed) => render(ctrl, changed),
                PollResult::Reconnecting { attempt, retry_in } => {
                    println!(
                        "Connection attempt {attempt} failed; retrying in {}s",
                        retry_in.as_secs()
                    );
                }
                PollResult::Unreachable { attempts } => {
                    return Err(ClientError::Unreachable { attempts }.into());
                }
                PollResult::Ended(SessionEnd::Expired) => {
                    return Err(ClientError::SessionExpired.into());
                }
                PollResult::Ended(SessionEnd::Left) => {
                    println!("Left the game.");
                    break;
                }
            },

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match view::parse_command(&line) {
                    Ok(Some(command)) => {
                        if handle_command(ctrl, api, command).await? == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(usage) => println!("{usage}"),
                }
            }
        }
    }

    Ok(())
}

async fn handle_command(
    ctrl: &mut Controller,
    api: &HttpGameService,
    command: Command,
) -> Result<Flow, Box<dyn std::error::Error>> {
    let action = match command {
        Command::Wager(wager) => UserAction::SelectWager(wager),
        Command::Answer(text) => {
            UserAction::SelectAnswer(view::answer_for(ctrl.session().question.as_ref(), &text))
        }
        Command::Part { id, text } => UserAction::SetPart { id, text },
        Command::Item { index, text } => UserAction::SetItem { index, text },
        Command::Submit => UserAction::Submit,
        Command::Ready => UserAction::SignalReady,
        Command::Lobby => UserAction::ReturnToLobby,
        Command::Quit => {
            info!("quitting; session kept for later");
            return Ok(Flow::Quit);
        }
        Command::Help => {
            println!("{}", view::HELP);
            return Ok(Flow::Continue);
        }
        Command::Toggle => {
            let on = ctrl.toggle_view()?;
            println!("Scoreboard view {}", if on { "on" } else { "off" });
            println!("{}", view::status_line(ctrl.session(), ctrl.show_scores()));
            return Ok(Flow::Continue);
        }
        Command::Games | Command::Scores | Command::Start => {
            call_api(ctrl, api, command).await?;
            return Ok(Flow::Continue);
        }
    };

    let leaving = action == UserAction::ReturnToLobby;
    match ctrl.act(action) {
        Ok(changed) => render(ctrl, changed),
        Err(ClientError::Submit(e)) => println!("! {e}"),
        Err(e) => return Err(e.into()),
    }
    if leaving && ctrl.session().game_id.is_none() {
        println!("Left the game.");
        return Ok(Flow::Quit);
    }
    Ok(Flow::Continue)
}

/// Game service commands. A rejected request is printed; expired
/// credentials end the session.
async fn call_api(
    ctrl: &mut Controller,
    api: &HttpGameService,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let game_id = ctrl.session().game_id.clone();
    let result = match (command, game_id) {
        (Command::Games, _) => api.fetch_active_games().await.map(|games| {
            if games.is_empty() {
                println!("No active games");
            }
            for game in games {
                match game.created_at {
                    Some(at) => println!("  {} (created {at})", game.id),
                    None => println!("  {}", game.id),
                }
            }
        }),
        (Command::Scores, Some(id)) => api.fetch_scores(&id).await.map(|mut scores| {
            scores.sort_by(|a, b| b.score.cmp(&a.score));
            for s in scores {
                println!("  team {:>4}  {:>4}", s.team_id, s.score);
            }
        }),
        (Command::Start, Some(id)) => api
            .start(&id)
            .await
            .map(|()| println!("Start requested for game {id}")),
        _ => {
            println!("! not in a game");
            return Ok(());
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(ApiError::Unauthorized) => {
            ctrl.logout()?;
            Err(ClientError::SessionExpired.into())
        }
        Err(e) => {
            println!("! {e}");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn render(ctrl: &Controller, changed: StateChanged) {
    let session = ctrl.session();
    if changed.question {
        for line in view::question_block(session) {
            println!("{line}");
        }
    }
    if changed.reveal
        && let Some(text) = view::reveal_text(session)
    {
        println!("{text}");
    }
    if changed.notice
        && let Some(notice) = &session.last_notice
    {
        println!("! {notice}");
    }
    if changed.phase && session.phase == Phase::Ended {
        println!("Game over, final score {}. Type lobby to leave.", session.score());
    }

    // Countdown ticks only print every ten seconds and for the last five.
    let timer_only = changed == StateChanged { timer: true, ..StateChanged::default() };
    let secs = session.time_left_secs;
    if changed.any() && (!timer_only || secs % 10 == 0 || secs <= 5) {
        println!("{}", view::status_line(session, ctrl.show_scores()));
    }
}
