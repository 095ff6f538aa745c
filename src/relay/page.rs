use anyhow::{Context, Result};
use serde_json::Value;

const DATA_MARKER: &str = "%%PROJECT_DATA%%";

pub const RELAY_JS: &str = r#"const data = window.__PROJECT_DATA__ || { nodes: [], edges: [] };
const pending = new Map();
let nextId = 1;
let socket = null;

function connect() {
  socket = new WebSocket(`ws://${location.host}/`);
  socket.addEventListener("open", () => setStatus("connected"));
  socket.addEventListener("close", () => {
    setStatus("disconnected");
    for (const [, entry] of pending) entry.reject(new Error("relay closed"));
    pending.clear();
  });
  socket.addEventListener("message", (event) => {
    let reply;
    try {
      reply = JSON.parse(event.data);
    } catch (_) {
      return;
    }
    const entry = pending.get(String(reply.id));
    if (!entry) return;
    pending.delete(String(reply.id));
    if (reply.ok) entry.resolve(reply);
    else entry.reject(new Error(reply.error || "command failed"));
  });
}

export function sendCommand(command, args = {}) {
  const id = String(nextId++);
  return new Promise((resolve, reject) => {
    if (!socket || socket.readyState !== WebSocket.OPEN) {
      reject(new Error("relay not connected"));
      return;
    }
    pending.set(id, { resolve, reject });
    socket.send(JSON.stringify({ id, command, args }));
  });
}

function setStatus(text) {
  const el = document.getElementById("relay-status");
  if (el) el.textContent = text;
}

function renderSummary() {
  const summary = document.getElementById("summary");
  const scripts = data.total_scripts ?? (data.nodes || []).length;
  const connections = data.total_connections ?? (data.edges || []).length;
  summary.textContent = `${scripts} scripts, ${connections} connections`;
}

function renderNodes() {
  const list = document.getElementById("nodes");
  list.replaceChildren();
  for (const node of data.nodes || []) {
    const item = document.createElement("li");
    const title = document.createElement("button");
    title.textContent = node.class_name ? `${node.class_name} (${node.path})` : node.path;
    title.addEventListener("click", () => inspect(node));
    item.appendChild(title);
    if (node.extends) {
      const base = document.createElement("span");
      base.className = "extends";
      base.textContent = ` extends ${node.extends}`;
      item.appendChild(base);
    }
    list.appendChild(item);
  }
}

async function inspect(node) {
  const detail = document.getElementById("detail");
  detail.textContent = `Loading ${node.path}...`;
  try {
    const reply = await sendCommand("get_script_info", { path: node.path });
    detail.textContent = JSON.stringify(reply, null, 2);
  } catch (err) {
    detail.textContent = `${node.path}: ${err.message}\n\n${JSON.stringify(node, null, 2)}`;
  }
}

renderSummary();
renderNodes();
connect();
"#;

pub const RELAY_CSS: &str = r#":root { --bg:#0f172a; --fg:#e2e8f0; --muted:#94a3b8; --acc:#478cbf; --panel:#111827; }
body { margin:0; font-family: ui-sans-serif,system-ui,-apple-system; background:var(--bg); color:var(--fg); }
header { display:flex; justify-content:space-between; align-items:center; padding:.8rem 1.2rem; border-bottom:1px solid rgba(148,163,184,0.2); }
h1 { margin:0; font-size:1.1rem; color:var(--acc); }
main { display:grid; grid-template-columns: minmax(240px, 1fr) 2fr; gap:1rem; padding:1rem; }
ul { list-style:none; margin:0; padding:0; }
li { margin:.25rem 0; }
button { background:none; border:none; color:var(--fg); cursor:pointer; font:inherit; padding:0; }
button:hover { color:var(--acc); }
.extends, #summary, #relay-status { color:var(--muted); font-size:.85rem; }
pre { margin:0; white-space:pre-wrap; background:var(--panel); border-radius:10px; padding:1rem; font-size:.85rem; }
"#;

const TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Godot Project Map</title>
    <link rel="stylesheet" href="/relay.css" />
  </head>
  <body>
    <header>
      <h1>Godot Project Map</h1>
      <span id="summary"></span>
      <span id="relay-status">connecting</span>
    </header>
    <main>
      <ul id="nodes"></ul>
      <pre id="detail">Select a script to inspect it.</pre>
    </main>
    <script>window.__PROJECT_DATA__ = %%PROJECT_DATA%%;</script>
    <script type="module" src="/relay.js"></script>
  </body>
</html>
"#;

/// Renders the relay page with `data` embedded as the initial payload.
pub fn render(data: &Value) -> Result<String> {
    let json = serde_json::to_string(data).context("failed serializing project data")?;
    Ok(TEMPLATE.replacen(DATA_MARKER, &escape_script_json(&json), 1))
}

// JSON text is valid JavaScript, but `</` would end the inline script element.
fn escape_script_json(json: &str) -> String {
    json.replace("</", "<\\/")
}
