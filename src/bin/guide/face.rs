use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use crate::types::{Command, PanelEvent};

impl PanelEvent {
    fn to_sse_event(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(self.name()).data(data)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<Command>,
    pub event_tx: broadcast::Sender<PanelEvent>,
}

/// Start the control panel on the first free port from `port`. Returns the
/// command receiver and the event sender.
pub async fn start_server(
    port: u16,
) -> Result<(mpsc::Receiver<Command>, broadcast::Sender<PanelEvent>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(8);
    let (event_tx, _) = broadcast::channel::<PanelEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            Ok(l) => {
                bound = Some((l, p));
                break;
            }
            Err(e) => debug!(port = p, error = %e, "port unavailable"),
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!("could not bind any port in {port}..{}", port.saturating_add(10))
    })?;

    info!("control panel at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "control panel server stopped");
        }
    });

    Ok((cmd_rx, event_tx))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> StatusCode {
    debug!(?command, "panel command");
    match state.cmd_tx.send(command).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => {
            warn!("guidance loop is gone, dropping command");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<PanelEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Navguide</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 28px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 18px; font-weight: 600; color: #fff; }
  header .dot { width: 8px; height: 8px; border-radius: 50%; background: #555; }
  header .dot.active { background: #22c55e; animation: pulse 2s infinite; }
  @keyframes pulse { 0%, 100% { opacity: 1; } 50% { opacity: 0.4; } }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 720px;
    width: 100%;
    margin: 0 auto;
    padding: 20px 28px;
    gap: 14px;
    overflow: hidden;
  }
  #current {
    background: #111118;
    border-left: 3px solid #6366f1;
    border-radius: 8px;
    padding: 14px 16px;
    min-height: 64px;
  }
  #current .title { color: #818cf8; font-size: 12px; font-weight: 700; text-transform: uppercase; }
  #current .ins { font-size: 16px; margin-top: 4px; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 13px; background: #111118; }
  .entry.error { background: #1a0a0a; border-left: 3px solid #ef4444; color: #fca5a5; }
  .entry.done { background: #0a1a0a; border-left: 3px solid #22c55e; color: #86efac; }
  .entry.nav { border-left: 3px solid #f59e0b; color: #fcd34d; }
  .row { display: flex; gap: 8px; }
  #goal {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 14px;
    color: #fff;
    font-size: 15px;
    outline: none;
  }
  #goal:focus { border-color: #6366f1; }
  select {
    background: #111118; color: #fff; border: 1px solid #222; border-radius: 8px; padding: 0 10px;
  }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 10px 18px;
    font-size: 14px;
    font-weight: 600;
    cursor: pointer;
  }
  button.secondary { background: #1f1f2e; }
  button:disabled { background: #333; cursor: not-allowed; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>Navguide</h1>
  </header>
  <div class="main">
    <div class="row">
      <input type="text" id="goal" placeholder="What do you want to do on this site?" autofocus />
      <select id="mode">
        <option value="heuristic">Heuristic</option>
        <option value="llm">LLM</option>
      </select>
      <button id="start">Start</button>
    </div>
    <div id="current"><div class="title">Idle</div><div class="ins">Enter a goal to begin.</div></div>
    <div class="row">
      <button class="secondary" id="skip">Skip step</button>
      <button class="secondary" id="rescan">Rescan</button>
      <button class="secondary" id="stop">Stop</button>
    </div>
    <div id="log"></div>
  </div>
<script>
  const $ = id => document.getElementById(id);
  const esc = s => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function addEntry(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    $('log').prepend(div);
  }

  function post(body) {
    return fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify(body),
    });
  }

  $('start').onclick = () => {
    const goal = $('goal').value.trim();
    if (goal) post({type: 'start', goal, mode: $('mode').value});
  };
  $('goal').addEventListener('keydown', e => { if (e.key === 'Enter') $('start').click(); });
  $('skip').onclick = () => post({type: 'skip'});
  $('rescan').onclick = () => post({type: 'rescan'});
  $('stop').onclick = () => post({type: 'stop'});

  const es = new EventSource('/events');

  es.addEventListener('state', e => {
    const s = JSON.parse(e.data).state;
    $('status-dot').className = s.isActive ? 'dot active' : 'dot';
    if (!s.isActive) {
      $('current').innerHTML = '<div class="title">Idle</div><div class="ins">Enter a goal to begin.</div>';
    }
  });
  es.addEventListener('step', e => {
    const d = JSON.parse(e.data);
    $('current').innerHTML = '<div class="title">' + esc(d.step.stepTitle) + ' · ' + esc(d.step.action) +
      '</div><div class="ins">' + esc(d.step.instruction) + '</div>';
  });
  es.addEventListener('completed', e => {
    addEntry('done', 'Completed: ' + esc(JSON.parse(e.data).action));
  });
  es.addEventListener('navigation', e => {
    addEntry('nav', 'Page changed: ' + esc(JSON.parse(e.data).url));
  });
  es.addEventListener('error', e => {
    if (!e.data) return;
    addEntry('error', esc(JSON.parse(e.data).message));
  });
</script>
</body>
</html>
"##;
