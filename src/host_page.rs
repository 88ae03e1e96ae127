//! The page served at `/` by `pagecraft serve`.
//!
//! It hosts the sandboxed preview frame, writes each render cycle's document
//! into it and relays what the frame reports back to the server.

use crate::preview_compiler::{BRIDGE_CHANNEL, ERROR_MARKER_ID};

/// Sandbox flags of the preview frame.
pub const FRAME_SANDBOX: &str = "allow-scripts allow-same-origin";

/// Header carrying the render cycle of `/api/document`.
pub const CYCLE_HEADER: &str = "x-pagecraft-cycle";

const POLL_INTERVAL_MS: u32 = 500;

pub fn build_host_page(model: &str) -> String {
    let script = HOST_SCRIPT
        .replace("__CHANNEL__", &js_string(BRIDGE_CHANNEL))
        .replace("__FRAME_SANDBOX__", &js_string(FRAME_SANDBOX))
        .replace("__ERROR_MARKER_ID__", &js_string(ERROR_MARKER_ID))
        .replace("__CYCLE_HEADER__", &js_string(CYCLE_HEADER))
        .replace("__POLL_INTERVAL_MS__", &POLL_INTERVAL_MS.to_string());

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>pagecraft</title>
<style>
{HOST_CSS}
</style>
</head>
<body>
<header>
  <h1>pagecraft</h1>
  <span class="model">{model}</span>
  <button id="settings-toggle" type="button">API Key</button>
</header>
<section id="settings" hidden>
  <form id="credential-form">
    <label for="api-key">Gemini API key</label>
    <input id="api-key" type="password" autocomplete="off" placeholder="Paste your key">
    <button type="submit">Save</button>
  </form>
</section>
<form id="prompt-form">
  <textarea id="prompt" rows="3" placeholder="Describe the component you want..."></textarea>
  <button id="generate" type="submit" disabled>Generate</button>
</form>
<nav class="tabs">
  <button type="button" class="tab active" data-tab="preview">Preview</button>
  <button type="button" class="tab" data-tab="code">Code</button>
</nav>
<main>
  <div id="pane-preview" class="pane active">
    <iframe id="frame" title="Preview" sandbox="{FRAME_SANDBOX}" src="about:blank"></iframe>
    <div id="loading" class="overlay" hidden>Loading preview...</div>
    <div id="error" class="overlay error" hidden>
      <h3>Preview Error</h3>
      <p id="error-message"></p>
      <pre id="error-console"></pre>
      <button id="retry" type="button">Try Again</button>
    </div>
    <div id="empty" class="overlay">Your preview will appear here.</div>
  </div>
  <div id="pane-code" class="pane">
    <div class="code-actions">
      <button id="copy" type="button">Copy</button>
      <a id="download" href="/api/source/download">Download</a>
    </div>
    <pre id="source"></pre>
  </div>
</main>
<div id="toasts"></div>
<script>
{script}
</script>
</body>
</html>
"##,
        model = html_escape(model),
    )
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const HOST_CSS: &str = r#"* { box-sizing: border-box; }
body { margin: 0; font-family: system-ui, sans-serif; background: #f9fafb; color: #111827; display: flex; flex-direction: column; height: 100vh; }
header { display: flex; align-items: center; gap: 12px; padding: 10px 16px; border-bottom: 1px solid #e5e7eb; background: #fff; }
header h1 { font-size: 18px; margin: 0; }
header .model { color: #6b7280; font-size: 13px; flex: 1; }
button, a { font: inherit; padding: 6px 12px; border-radius: 6px; border: 1px solid #d1d5db; background: #fff; color: inherit; cursor: pointer; text-decoration: none; }
button[type=submit] { background: #4f46e5; border-color: #4f46e5; color: #fff; }
button:disabled { opacity: 0.5; cursor: default; }
#settings, #prompt-form { padding: 10px 16px; background: #fff; border-bottom: 1px solid #e5e7eb; }
#credential-form, #prompt-form { display: flex; gap: 8px; align-items: center; }
#api-key, #prompt { flex: 1; padding: 8px; border: 1px solid #d1d5db; border-radius: 6px; font: inherit; }
.tabs { display: flex; gap: 4px; padding: 8px 16px 0; }
.tab.active { background: #eef2ff; border-color: #a5b4fc; }
main { flex: 1; position: relative; margin: 8px 16px 16px; border: 1px solid #e5e7eb; border-radius: 8px; background: #fff; overflow: hidden; }
.pane { display: none; position: absolute; inset: 0; }
.pane.active { display: block; }
#frame { width: 100%; height: 100%; border: 0; }
.overlay { position: absolute; inset: 0; display: flex; flex-direction: column; align-items: center; justify-content: center; background: rgba(255,255,255,0.92); color: #6b7280; }
.overlay[hidden] { display: none; }
.overlay.error { color: #991b1b; background: #fef2f2; padding: 24px; }
#error-console { max-width: 90%; max-height: 40%; overflow: auto; font-size: 12px; white-space: pre-wrap; }
#pane-code { overflow: auto; }
.code-actions { position: sticky; top: 0; display: flex; gap: 8px; justify-content: flex-end; padding: 8px; background: #fff; }
#source { margin: 0; padding: 16px; font-size: 13px; white-space: pre-wrap; }
#toasts { position: fixed; right: 16px; bottom: 16px; display: flex; flex-direction: column; gap: 8px; }
.toast { min-width: 260px; max-width: 380px; padding: 10px 14px; border-radius: 8px; background: #111827; color: #fff; box-shadow: 0 4px 12px rgba(0,0,0,0.15); }
.toast.destructive { background: #b91c1c; }
.toast strong { display: block; margin-bottom: 2px; }"#;

const HOST_SCRIPT: &str = r#"(function () {
  var CHANNEL = __CHANNEL__;
  var ERROR_MARKER_ID = __ERROR_MARKER_ID__;
  var CYCLE_HEADER = __CYCLE_HEADER__;
  var FRAME_SANDBOX = __FRAME_SANDBOX__;
  var frame = document.getElementById('frame');
  var prompt = document.getElementById('prompt');
  var generate = document.getElementById('generate');
  var writtenCycle = 0;
  var seenToasts = {};
  var generating = false;

  function $(id) { return document.getElementById(id); }

  function post(url, body) {
    return fetch(url, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify(body || {})
    });
  }

  function showToast(title, description, variant) {
    var toast = document.createElement('div');
    toast.className = 'toast' + (variant === 'destructive' ? ' destructive' : '');
    var heading = document.createElement('strong');
    heading.textContent = title;
    var text = document.createElement('span');
    text.textContent = description;
    toast.appendChild(heading);
    toast.appendChild(text);
    $('toasts').appendChild(toast);
    setTimeout(function () { toast.remove(); }, 5000);
  }

  function relay(cycle, event) {
    var payload = { cycle: cycle };
    for (var key in event) { if (key !== 'channel') { payload[key] = event[key]; } }
    post('/api/events', payload);
  }

  // Each cycle gets a new frame so no globals survive from the previous document.
  function writeDocument(cycle, html) {
    try {
      var next = document.createElement('iframe');
      next.id = 'frame';
      next.title = 'Preview';
      next.setAttribute('sandbox', FRAME_SANDBOX);
      next.onload = function () {
        var doc = next.contentDocument;
        var marker = doc ? doc.getElementById(ERROR_MARKER_ID) : null;
        relay(cycle, { kind: 'loaded', errorMarker: !!marker });
      };
      next.srcdoc = html;
      frame.replaceWith(next);
      frame = next;
    } catch (err) {
      relay(cycle, { kind: 'error', message: String(err && err.message ? err.message : err) });
    }
  }

  function loadDocument(cycle) {
    writtenCycle = cycle;
    fetch('/api/document').then(function (response) {
      if (!response.ok) { return null; }
      var served = Number(response.headers.get(CYCLE_HEADER));
      return response.text().then(function (html) { return { cycle: served, html: html }; });
    }).then(function (served) {
      if (served && served.cycle === writtenCycle) { writeDocument(served.cycle, served.html); }
    });
  }

  window.addEventListener('message', function (event) {
    if (event.source !== frame.contentWindow) { return; }
    var data = event.data;
    if (!data || data.channel !== CHANNEL) { return; }
    relay(writtenCycle, data);
  });

  function showRender(render) {
    $('empty').hidden = render.status !== 'idle';
    $('loading').hidden = render.status !== 'loading';
    $('error').hidden = render.status !== 'error';
    if (render.status === 'error') {
      $('error-message').textContent = render.message || '';
      var lines = render.console.map(function (entry) {
        return '[' + entry.level + '] ' + entry.message;
      });
      if (render.console_dropped > 0) {
        lines.unshift('(' + render.console_dropped + ' earlier entries dropped)');
      }
      $('error-console').textContent = lines.join('\n');
    }
    if (render.status === 'loading' && render.cycle !== writtenCycle) {
      loadDocument(render.cycle);
    }
  }

  function refreshSource() {
    fetch('/api/source').then(function (response) {
      return response.ok ? response.text() : '';
    }).then(function (text) { $('source').textContent = text; });
  }

  var lastCycleWithSource = 0;

  function poll() {
    fetch('/api/status').then(function (response) { return response.json(); }).then(function (status) {
      generating = status.generating;
      generate.disabled = generating || !prompt.value.trim();
      generate.textContent = generating ? 'Generating...' : 'Generate';
      $('settings').hidden = status.has_api_key && $('settings').dataset.open !== 'true';
      status.toasts.forEach(function (toast) {
        var key = toast.created_at + '|' + toast.title + '|' + toast.description;
        if (!seenToasts[key]) {
          seenToasts[key] = true;
          showToast(toast.title, toast.description, toast.variant);
        }
      });
      showRender(status.render);
      if (status.render.cycle !== lastCycleWithSource) {
        lastCycleWithSource = status.render.cycle;
        refreshSource();
      }
    }).catch(function () { /* server restarting */ }).then(function () {
      setTimeout(poll, __POLL_INTERVAL_MS__);
    });
  }

  prompt.addEventListener('input', function () {
    generate.disabled = generating || !prompt.value.trim();
  });

  $('prompt-form').addEventListener('submit', function (event) {
    event.preventDefault();
    var text = prompt.value.trim();
    if (!text || generating) { return; }
    generating = true;
    generate.disabled = true;
    generate.textContent = 'Generating...';
    post('/api/generate', { prompt: text });
  });

  $('credential-form').addEventListener('submit', function (event) {
    event.preventDefault();
    var key = $('api-key').value.trim();
    if (!key) { return; }
    post('/api/credential', { api_key: key }).then(function () {
      $('api-key').value = '';
      $('settings').dataset.open = 'false';
    });
  });

  $('settings-toggle').addEventListener('click', function () {
    var open = $('settings').dataset.open === 'true';
    $('settings').dataset.open = open ? 'false' : 'true';
    $('settings').hidden = open;
  });

  $('retry').addEventListener('click', function () { post('/api/retry'); });

  $('copy').addEventListener('click', function () {
    navigator.clipboard.writeText($('source').textContent).then(function () {
      showToast('Copied', 'Code copied to clipboard', 'default');
    });
  });

  Array.prototype.forEach.call(document.querySelectorAll('.tab'), function (tab) {
    tab.addEventListener('click', function () {
      Array.prototype.forEach.call(document.querySelectorAll('.tab, .pane'), function (el) {
        el.classList.remove('active');
      });
      tab.classList.add('active');
      $('pane-' + tab.dataset.tab).classList.add('active');
    });
  });

  poll();
})();"#;
