//! Turns generated component source into a self-contained preview document.
//!
//! The document loads React, ReactDOM, Babel standalone and Tailwind from
//! fixed CDN URLs, installs a small bridge that reports console output and
//! errors to the embedding page, stubs a few platform APIs, embeds the
//! source in a `text/babel` script and finally mounts the component chosen
//! by the [`MountPlan`].
//!
//! [`compile`] is pure: the same source always yields the same bytes.

use crate::mount_strategy::{MountPlan, ScopeMode, NO_COMPONENT_MESSAGE};
use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::OnceLock;

pub const TAILWIND_URL: &str = "https://cdn.tailwindcss.com";
pub const REACT_URL: &str = "https://unpkg.com/react@18/umd/react.development.js";
pub const REACT_DOM_URL: &str = "https://unpkg.com/react-dom@18/umd/react-dom.development.js";
pub const BABEL_URL: &str = "https://unpkg.com/@babel/standalone/babel.min.js";

/// `postMessage` channel name used by the bridge script.
pub const BRIDGE_CHANNEL: &str = "pagecraft-preview";
/// Id of the element rendered when evaluation or mounting fails.
pub const ERROR_MARKER_ID: &str = "preview-error";
/// Id of the mount target.
pub const ROOT_ID: &str = "root";

/// A compiled preview page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewDocument {
    pub html: String,
    pub plan: MountPlan,
}

impl PreviewDocument {
    pub fn as_str(&self) -> &str {
        &self.html
    }
}

/// Source after import rewriting, ready to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub code: String,
    /// Modules whose imports were replaced by stubs or dropped.
    pub stubbed_modules: Vec<String>,
}

/// Rewrites ES imports so the source runs against the UMD globals.
///
/// - `react` named imports destructure `React`
/// - `react-dom` / `react-dom/client` named imports destructure `ReactDOM`
/// - bindings imported from any other module become placeholder components
/// - side-effect imports (`import './x.css'`) are dropped
/// - TypeScript `import type` statements and inline `type` specifiers are dropped
pub fn prepare_source(source: &str) -> PreparedSource {
    static IMPORT_FROM: OnceLock<Regex> = OnceLock::new();
    static IMPORT_BARE: OnceLock<Regex> = OnceLock::new();
    let import_from = IMPORT_FROM.get_or_init(|| {
        Regex::new(r#"(?m)^[ \t]*import\s+([^'";]+?)\s+from\s+['"]([^'"]+)['"][ \t]*;?"#).unwrap()
    });
    let import_bare = IMPORT_BARE.get_or_init(|| {
        Regex::new(r#"(?m)^[ \t]*import\s+['"]([^'"]+)['"][ \t]*;?"#).unwrap()
    });

    let mut stubbed_modules = Vec::new();

    let code = import_from.replace_all(source, |caps: &Captures<'_>| {
        let clause = caps[1].trim();
        let module = &caps[2];
        if is_type_only(clause) {
            return format!("/* pagecraft: dropped type import from '{}' */", module);
        }
        match module {
            "react" => rewrite_umd_import(clause, "React"),
            "react-dom" | "react-dom/client" => rewrite_umd_import(clause, "ReactDOM"),
            other => {
                stubbed_modules.push(other.to_string());
                stub_import(clause, other)
            }
        }
    });

    let code = import_bare.replace_all(&code, |caps: &Captures<'_>| {
        stubbed_modules.push(caps[1].to_string());
        format!("/* pagecraft: dropped import '{}' */", &caps[1])
    });

    PreparedSource {
        code: code.into_owned(),
        stubbed_modules,
    }
}

fn is_type_only(clause: &str) -> bool {
    clause
        .strip_prefix("type")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_whitespace() || c == '{' || c == '*')
}

fn rewrite_umd_import(clause: &str, global: &str) -> String {
    let named = named_bindings(clause);
    if named.is_empty() {
        // Default and namespace imports already exist as globals.
        return format!("/* pagecraft: {} is global */", global);
    }
    format!("const {{ {} }} = {};", named.join(", "), global)
}

fn stub_import(clause: &str, module: &str) -> String {
    let module_json = js_string(module);
    let mut lines = Vec::new();

    if let Some(namespace) = namespace_binding(clause) {
        lines.push(format!(
            "const {} = window.__pagecraftStubModule({});",
            namespace, module_json
        ));
    }
    if let Some(default) = default_binding(clause) {
        lines.push(format!(
            "const {} = window.__pagecraftStub({}, {});",
            default,
            js_string(default),
            module_json
        ));
    }
    for binding in named_bindings(clause) {
        // `a: b` destructuring form from named_bindings; the local is `b`.
        let (imported, local) = match binding.split_once(':') {
            Some((imported, local)) => (imported.trim().to_string(), local.trim().to_string()),
            None => (binding.clone(), binding),
        };
        lines.push(format!(
            "const {} = window.__pagecraftStub({}, {});",
            local,
            js_string(&imported),
            module_json
        ));
    }

    lines.join(" ")
}

/// Names inside `{ ... }`, with `a as b` rewritten to `a: b`.
fn named_bindings(clause: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (clause.find('{'), clause.rfind('}')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }

    clause[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && !part.starts_with("type "))
        .map(|part| match part.split_once(" as ") {
            Some((imported, local)) => format!("{}: {}", imported.trim(), local.trim()),
            None => part.to_string(),
        })
        .collect()
}

fn default_binding(clause: &str) -> Option<&str> {
    let head = clause.split(',').next()?.trim();
    if head.is_empty() || head.starts_with('{') || head.starts_with('*') {
        None
    } else {
        Some(head)
    }
}

fn namespace_binding(clause: &str) -> Option<&str> {
    let star = clause.find('*')?;
    let rest = clause[star + 1..].trim_start();
    let name = rest.strip_prefix("as")?.trim();
    let end = name
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(name.len());
    Some(&name[..end]).filter(|n| !n.is_empty())
}

/// Keeps embedded source from closing the surrounding script element.
fn escape_script_body(code: &str) -> String {
    static SCRIPT_CLOSE: OnceLock<Regex> = OnceLock::new();
    let re = SCRIPT_CLOSE.get_or_init(|| Regex::new(r"(?i)</(script)").unwrap());
    re.replace_all(code, "<\\/$1").into_owned()
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Builds the mount call appended after the source.
///
/// Candidate names are valid identifiers by construction, so they can be
/// referenced lexically. `typeof` keeps undeclared names from throwing.
fn mount_call(plan: &MountPlan) -> String {
    let mut out = String::from(";(function () {\n  window.__pagecraftMount([\n");
    for candidate in &plan.candidates {
        out.push_str(&format!(
            "    {{ name: {name_json}, strategy: {strategy_json}, resolve: function () {{ return typeof {name} === 'function' ? {name} : undefined; }} }},\n",
            name = candidate.name,
            name_json = js_string(&candidate.name),
            strategy_json = js_string(candidate.strategy.as_str()),
        ));
    }
    out.push_str("  ]);\n})();");
    out
}

/// Compiles generated source into a preview document.
pub fn compile(source: &str) -> PreviewDocument {
    let prepared = prepare_source(source);
    let plan = MountPlan::resolve(&prepared.code);

    let module_attr = match plan.mode {
        ScopeMode::Module => r#" data-type="module""#,
        ScopeMode::Script => "",
    };

    let bridge = BRIDGE_SCRIPT
        .replace("__CHANNEL__", &js_string(BRIDGE_CHANNEL))
        .replace("__ERROR_MARKER_ID__", &js_string(ERROR_MARKER_ID))
        .replace("__ROOT_ID__", &js_string(ROOT_ID));
    let runtime = MOUNT_RUNTIME
        .replace("__ROOT_ID__", &js_string(ROOT_ID))
        .replace("__NO_COMPONENT_MESSAGE__", &js_string(NO_COMPONENT_MESSAGE));

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Preview</title>
  <script>
{bridge}
  </script>
  <script src="{TAILWIND_URL}"></script>
  <script src="{REACT_URL}"></script>
  <script src="{REACT_DOM_URL}"></script>
  <script src="{BABEL_URL}"></script>
  <script>
{MOCK_GLOBALS}
{runtime}
  </script>
</head>
<body>
  <div id="{ROOT_ID}"></div>
  <script type="text/babel" data-presets="react"{module_attr}>
{code}

{mount}
  </script>
</body>
</html>
"#,
        code = escape_script_body(&prepared.code),
        mount = mount_call(&plan),
    );

    PreviewDocument { html, plan }
}

/// Reports console output and uncaught errors to the parent page and draws
/// the inline error panel.
const BRIDGE_SCRIPT: &str = r#"(function () {
  if (window.__pagecraftBridgeInstalled) { return; }
  window.__pagecraftBridgeInstalled = true;
  var CHANNEL = __CHANNEL__;
  function report(kind, payload) {
    var message = { channel: CHANNEL, kind: kind };
    for (var key in payload) { message[key] = payload[key]; }
    try { window.parent.postMessage(message, '*'); } catch (e) { /* detached */ }
  }
  function format(args) {
    return Array.prototype.map.call(args, function (value) {
      if (value instanceof Error) { return value.stack || value.message; }
      if (value !== null && typeof value === 'object') {
        try { return JSON.stringify(value); } catch (e) { return String(value); }
      }
      return String(value);
    }).join(' ');
  }
  ['log', 'info', 'warn', 'error', 'debug'].forEach(function (level) {
    var original = console[level];
    console[level] = function () {
      report('console', { level: level, message: format(arguments) });
      return original.apply(console, arguments);
    };
  });
  window.__pagecraftReport = report;
  window.__pagecraftShowError = function (error) {
    var message = error && error.message ? error.message : String(error);
    var stack = error && error.stack ? String(error.stack) : '';
    var target = document.getElementById(__ROOT_ID__) || document.body;
    var panel = document.createElement('div');
    panel.id = __ERROR_MARKER_ID__;
    panel.style.cssText = 'margin:16px;padding:16px;border:1px solid #fca5a5;border-radius:6px;background:#fef2f2;color:#991b1b;font-family:system-ui,sans-serif';
    var title = document.createElement('h3');
    title.textContent = 'Error rendering component';
    title.style.cssText = 'margin:0 0 8px;font-weight:600';
    var text = document.createElement('p');
    text.textContent = message;
    text.style.cssText = 'margin:0 0 8px;font-size:14px';
    var trace = document.createElement('pre');
    trace.textContent = stack;
    trace.style.cssText = 'margin:0;font-size:12px;white-space:pre-wrap;overflow:auto';
    panel.appendChild(title);
    panel.appendChild(text);
    panel.appendChild(trace);
    var previous = document.getElementById(__ERROR_MARKER_ID__);
    if (previous) { previous.remove(); }
    target.appendChild(panel);
    report('error', { message: message, stack: stack });
  };
  window.addEventListener('error', function (event) {
    window.__pagecraftShowError(event.error || { message: event.message });
  });
  window.addEventListener('unhandledrejection', function (event) {
    window.__pagecraftShowError(event.reason);
  });
})();"#;

/// Stubs for platform APIs generated code tends to call right away.
const MOCK_GLOBALS: &str = r#"(function () {
  var MOCK_BODY = { data: [], message: 'Mock response from preview sandbox' };
  window.fetch = function (input) {
    console.info('[preview] fetch', String(input && input.url ? input.url : input));
    var text = JSON.stringify(MOCK_BODY);
    var response = {
      ok: true,
      status: 200,
      statusText: 'OK',
      headers: new Headers({ 'content-type': 'application/json' }),
      json: function () { return Promise.resolve(JSON.parse(text)); },
      text: function () { return Promise.resolve(text); }
    };
    response.clone = function () { return response; };
    return Promise.resolve(response);
  };
  window.navigate = function (to) { console.info('[preview] navigate', String(to)); };
  window.useNavigate = function () { return window.navigate; };
  window.preventDefault = function (event) {
    if (event && typeof event.preventDefault === 'function') { event.preventDefault(); }
  };
  window.__pagecraftStub = function (name, module) {
    var Stub = function (props) {
      return React.createElement('span', { 'data-stub': module + ':' + name, className: props && props.className }, props && props.children);
    };
    Stub.displayName = name;
    return Stub;
  };
  window.__pagecraftStubModule = function (module) {
    return new Proxy({}, { get: function (_, key) { return window.__pagecraftStub(String(key), module); } });
  };
})();"#;

/// Tries planned candidates in order, then uppercase globals, then fails.
const MOUNT_RUNTIME: &str = r#"window.__pagecraftMount = function (candidates) {
  var container = document.getElementById(__ROOT_ID__);
  function mount(Component) {
    var root = ReactDOM.createRoot(container);
    try {
      ReactDOM.flushSync(function () { root.render(React.createElement(Component)); });
      return root;
    } catch (err) {
      root.unmount();
      throw err;
    }
  }
  try {
    for (var i = 0; i < candidates.length; i++) {
      var component = candidates[i].resolve();
      if (component) {
        mount(component);
        window.__pagecraftReport('mounted', { component: candidates[i].name, strategy: candidates[i].strategy });
        return;
      }
    }
    var ignored = ['React', 'ReactDOM', 'Babel'];
    var globals = Object.keys(window).filter(function (key) {
      return /^[A-Z]/.test(key) && ignored.indexOf(key) === -1 && typeof window[key] === 'function';
    });
    for (var j = 0; j < globals.length; j++) {
      try {
        mount(window[globals[j]]);
        window.__pagecraftReport('mounted', { component: globals[j], strategy: 'global-scan' });
        return;
      } catch (err) {
        console.warn('Could not mount ' + globals[j] + ':', err);
      }
    }
    throw new Error(__NO_COMPONENT_MESSAGE__);
  } catch (err) {
    window.__pagecraftShowError(err);
  }
};"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount_strategy::StrategyKind;

    const BUTTON: &str = "function Btn(){return <button>Hi</button>}\nexport default Btn";

    #[test]
    fn test_compile_is_deterministic() {
        assert_eq!(compile(BUTTON), compile(BUTTON));
    }

    #[test]
    fn test_compile_loads_libraries_in_order() {
        let html = compile(BUTTON).html;
        let tailwind = html.find(TAILWIND_URL).unwrap();
        let react = html.find(REACT_URL).unwrap();
        let react_dom = html.find(REACT_DOM_URL).unwrap();
        let babel = html.find(BABEL_URL).unwrap();
        assert!(tailwind < react && react < react_dom && react_dom < babel);
    }

    #[test]
    fn test_compile_embeds_source_verbatim() {
        let html = compile(BUTTON).html;
        assert!(html.contains(BUTTON));
        assert!(html.contains(
            r#"<script type="text/babel" data-presets="react" data-type="module">"#
        ));
    }

    #[test]
    fn test_button_scenario_mounts_via_export_default() {
        let doc = compile(BUTTON);
        let selected = doc.plan.selected().unwrap();
        assert_eq!(selected.name, "Btn");
        assert_eq!(selected.strategy, StrategyKind::ExportDefault);
        assert!(doc.html.contains(
            r#"{ name: "Btn", strategy: "export-default", resolve: function () { return typeof Btn === 'function' ? Btn : undefined; } }"#
        ));
    }

    #[test]
    fn test_script_mode_without_exports() {
        let html = compile("function App() { return <div/>; }").html;
        assert!(html.contains(r#"<script type="text/babel" data-presets="react">"#));
        assert!(html.contains(r#"strategy: "declared-global""#));
    }

    #[test]
    fn test_no_component_document_carries_error_path() {
        let doc = compile("const notAComponent = 42;");
        assert!(doc.plan.candidates.is_empty());
        assert!(doc.html.contains("Could not find a React component to render"));
        assert!(doc.html.contains(r#"panel.id = "preview-error";"#));
        assert!(doc.html.contains("window.__pagecraftMount([\n  ]);"));
    }

    #[test]
    fn test_mock_globals_injected() {
        let html = compile(BUTTON).html;
        assert!(html.contains("window.fetch = function"));
        assert!(html.contains("window.navigate = function"));
        assert!(html.contains("window.preventDefault = function"));
    }

    #[test]
    fn test_bridge_uses_channel_name() {
        let html = compile(BUTTON).html;
        assert!(html.contains(r#"var CHANNEL = "pagecraft-preview";"#));
        assert!(!html.contains("__CHANNEL__"));
        assert!(!html.contains("__ROOT_ID__"));
        assert!(!html.contains("__NO_COMPONENT_MESSAGE__"));
    }

    #[test]
    fn test_script_close_tag_is_escaped() {
        let html = compile("const s = '</script><b>x</b>';\nfunction App() { return null; }").html;
        assert!(html.contains(r"const s = '<\/script><b>x</b>';"));
        assert_eq!(html.matches("</script>").count(), html.matches("<script").count());
    }

    #[test]
    fn test_prepare_source_rewrites_react_imports() {
        let prepared = prepare_source(
            "import React, { useState, useEffect as useFx } from 'react';\nfunction App() {}",
        );
        assert!(prepared.code.starts_with("const { useState, useEffect: useFx } = React;"));
        assert!(prepared.stubbed_modules.is_empty());
    }

    #[test]
    fn test_prepare_source_default_react_import_is_dropped() {
        let prepared = prepare_source("import React from \"react\";\nfunction App() {}");
        assert!(!prepared.code.contains("import"));
        assert!(prepared.code.contains("React is global"));
    }

    #[test]
    fn test_prepare_source_react_dom_client() {
        let prepared = prepare_source("import { createRoot } from 'react-dom/client';");
        assert_eq!(prepared.code, "const { createRoot } = ReactDOM;");
    }

    #[test]
    fn test_prepare_source_stubs_third_party_imports() {
        let prepared = prepare_source(
            "import { Star, Heart as Love } from 'lucide-react';\nimport * as Icons from 'icons';\nimport './styles.css';",
        );
        let code = &prepared.code;
        assert!(code.contains(r#"const Star = window.__pagecraftStub("Star", "lucide-react");"#));
        assert!(code.contains(r#"const Love = window.__pagecraftStub("Heart", "lucide-react");"#));
        assert!(prepared.code.contains(r#"const Icons = window.__pagecraftStubModule("icons");"#));
        assert!(prepared.code.contains("dropped import './styles.css'"));
        assert_eq!(prepared.stubbed_modules, vec!["lucide-react", "icons", "./styles.css"]);
    }

    #[test]
    fn test_prepare_source_multiline_import() {
        let prepared = prepare_source("import {\n  useState,\n  useMemo\n} from 'react';");
        assert_eq!(prepared.code, "const { useState, useMemo } = React;");
    }

    #[test]
    fn test_prepare_source_drops_type_imports() {
        let prepared = prepare_source(
            "import type { FC } from 'react';\nimport type * as T from './types';\nimport { type Props, useState } from 'react';",
        );
        assert!(!prepared.code.contains("const type"));
        assert!(prepared.code.contains("dropped type import from 'react'"));
        assert!(prepared.code.contains("dropped type import from './types'"));
        assert!(prepared.code.contains("const { useState } = React;"));
        assert!(!prepared.code.contains("Props"));
        assert!(prepared.stubbed_modules.is_empty());
    }

    #[test]
    fn test_prepare_source_default_import_named_type_is_kept() {
        let prepared = prepare_source("import type from 'kind-of';");
        assert_eq!(
            prepared.code,
            r#"const type = window.__pagecraftStub("type", "kind-of");"#
        );
    }

    #[test]
    fn test_bridge_installs_once_per_window() {
        let html = compile(BUTTON).html;
        assert!(html.contains("if (window.__pagecraftBridgeInstalled) { return; }"));
    }

    #[test]
    fn test_imports_do_not_force_module_mode() {
        let doc = compile("import React from 'react';\nfunction App() { return null; }");
        assert_eq!(doc.plan.mode, ScopeMode::Script);
    }
}
