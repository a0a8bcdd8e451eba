/* src/server/core/rust/src/build_loader/tests.rs */

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use super::*;
use crate::page::{ParamSource, ParamType};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn scratch_dir(name: &str) -> PathBuf {
  let n = COUNTER.fetch_add(1, Ordering::SeqCst);
  let dir = std::env::temp_dir().join(format!("weft-build-{name}-{}-{n}", std::process::id()));
  let _ = std::fs::remove_dir_all(&dir);
  std::fs::create_dir_all(dir.join("locales")).unwrap();
  dir
}

fn write(dir: &Path, rel: &str, contents: &str) {
  let path = dir.join(rel);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, contents).unwrap();
}

fn fixture(name: &str) -> PathBuf {
  let dir = scratch_dir(name);
  let manifest = json!({
    "data_id": "__app",
    "layouts": {
      "root": {
        "loaders": {"nav": {"procedure": "getNav"}},
        "i18n_keys": ["nav.home"]
      },
      "dash": {
        "parent": "root",
        "loaders": {"me": {"procedure": "getSession"}}
      }
    },
    "routes": {
      "/user/:id": {
        "template": "pages/user.html",
        "layout": "dash",
        "loaders": {
          "user": {
            "procedure": "getUser",
            "params": {"id": {"from": "route", "type": "int"}, "tab": {"from": "query"}}
          }
        },
        "i18n_keys": ["user.title", "nav.home"]
      },
      "/user/me": {"template": "pages/me.html"},
      "/": {
        "templates": {"en": "pages/index.en.html", "zh": "pages/index.zh.html"},
        "head_meta": "<title>Home</title>"
      }
    },
    "i18n": {"locales": ["en", "zh"], "default": "en"}
  });
  write(&dir, "route-manifest.json", &manifest.to_string());
  write(&dir, "pages/user.html", "<p>%%WEFT:user.name%%</p>");
  write(&dir, "pages/me.html", "<p>me</p>");
  write(&dir, "pages/index.en.html", "<p>hello</p>");
  write(&dir, "pages/index.zh.html", "<p>ni hao</p>");
  write(&dir, "locales/en.json", r#"{"nav.home": "Home"}"#);
  dir
}

#[test]
fn pages_load_in_specificity_order() {
  let dir = fixture("order");
  let pages = load_build_output(&dir).unwrap();
  let routes: Vec<&str> = pages.iter().map(|p| p.route.as_str()).collect();
  assert_eq!(routes, vec!["/", "/user/me", "/user/:id"]);
}

#[test]
fn layout_chain_is_outer_to_inner() {
  let dir = fixture("chain");
  let pages = load_build_output(&dir).unwrap();
  let user = pages.iter().find(|p| p.route == "/user/:id").unwrap();
  let ids: Vec<&str> = user.layout_chain.iter().map(|l| l.id.as_str()).collect();
  assert_eq!(ids, vec!["root", "dash"]);
  assert_eq!(user.i18n_keys, vec!["nav.home", "user.title"]);
  assert_eq!(user.data_id.as_deref(), Some("__app"));
  assert_eq!(user.template, "<p>%%WEFT:user.name%%</p>");
}

#[test]
fn loader_params_parse_source_and_type() {
  let dir = fixture("params");
  let pages = load_build_output(&dir).unwrap();
  let user = pages.iter().find(|p| p.route == "/user/:id").unwrap();
  let loader = &user.loaders[0];
  assert_eq!(loader.data_key, "user");
  assert_eq!(loader.procedure, "getUser");
  assert_eq!(loader.params.len(), 2);
  assert_eq!(loader.params[0].name, "id");
  assert_eq!(loader.params[0].from, ParamSource::Route);
  assert_eq!(loader.params[0].ty, ParamType::Int);
  assert_eq!(loader.params[1].from, ParamSource::Query);
  assert_eq!(loader.params[1].ty, ParamType::String);
}

#[test]
fn locale_templates_and_default_pick() {
  let dir = fixture("locales");
  let pages = load_build_output(&dir).unwrap();
  let index = pages.iter().find(|p| p.route == "/").unwrap();
  assert_eq!(index.template, "<p>hello</p>");
  assert_eq!(index.locale_templates["zh"], "<p>ni hao</p>");
  assert_eq!(index.head_meta.as_deref(), Some("<title>Home</title>"));
}

#[test]
fn i18n_config_reads_locale_files() {
  let dir = fixture("i18n");
  let config = load_i18n_config(&dir).unwrap().unwrap();
  assert_eq!(config.default, "en");
  assert_eq!(config.messages["en"]["nav.home"], "Home");
  assert!(config.messages["zh"].is_empty());
}

#[test]
fn rpc_hash_map_is_optional() {
  let dir = fixture("hash");
  assert!(load_rpc_hash_map(&dir).unwrap().is_none());

  write(
    &dir,
    "rpc-hash-map.json",
    r#"{"salt": "s", "batch": "b9f1", "procedures": {"greet": "a1c3"}}"#,
  );
  let map = load_rpc_hash_map(&dir).unwrap().unwrap();
  assert_eq!(map.batch, "b9f1");
  assert_eq!(map.reverse_lookup()["a1c3"], "greet");
}

#[test]
fn unknown_layout_is_an_error() {
  let dir = scratch_dir("bad-layout");
  write(
    &dir,
    "route-manifest.json",
    r#"{"routes": {"/": {"template": "i.html", "layout": "missing"}}}"#,
  );
  write(&dir, "i.html", "");
  let err = load_build_output(&dir).unwrap_err();
  assert!(matches!(err, LoadError::UnknownLayout { .. }));
}

#[test]
fn layout_cycle_is_an_error() {
  let dir = scratch_dir("cycle");
  write(
    &dir,
    "route-manifest.json",
    r#"{"layouts": {"a": {"parent": "b"}, "b": {"parent": "a"}},
        "routes": {"/": {"template": "i.html", "layout": "a"}}}"#,
  );
  write(&dir, "i.html", "");
  assert!(matches!(load_build_output(&dir).unwrap_err(), LoadError::LayoutCycle(_)));
}

#[test]
fn missing_manifest_reports_path() {
  let dir = scratch_dir("empty");
  let err = load_build_output(&dir).unwrap_err();
  assert!(err.to_string().contains(ROUTE_MANIFEST));
}

#[test]
fn layout_templates_load_as_separate_shells() {
  let dir = scratch_dir("shells");
  let manifest = json!({
    "layouts": {
      "root": {"template": "layouts/root.html"},
      "docs": {
        "parent": "root",
        "templates": {"en": "layouts/docs.en.html", "zh": "layouts/docs.zh.html"}
      },
      "bare": {"template": "layouts/bare.html"}
    },
    "routes": {
      "/docs": {"templates": {"en": "docs.en.html", "zh": "docs.zh.html"}, "layout": "docs"},
      "/plain": {"template": "docs.en.html", "layout": "bare"}
    },
    "i18n": {"locales": ["en", "zh"], "default": "en"}
  });
  write(&dir, "route-manifest.json", &manifest.to_string());
  write(&dir, "layouts/root.html", "<body><!--weft:outlet--></body>");
  write(&dir, "layouts/docs.en.html", "<nav>Docs</nav><!--weft:outlet-->");
  write(&dir, "layouts/docs.zh.html", "<nav>Wendang</nav><!--weft:outlet-->");
  write(&dir, "layouts/bare.html", "<div></div>");
  write(&dir, "docs.en.html", "<p>read</p>");
  write(&dir, "docs.zh.html", "<p>du</p>");

  let pages = load_build_output(&dir).unwrap();
  let docs = &pages[0];
  assert_eq!(docs.template, "<p>read</p>");
  assert_eq!(docs.locale_templates["zh"], "<p>du</p>");

  let root = docs.layout_chain[0].shell.as_ref().unwrap();
  assert_eq!(root.select(Some("zh")), "<body><!--weft:outlet--></body>");
  let inner = docs.layout_chain[1].shell.as_ref().unwrap();
  assert_eq!(inner.select(None), "<nav>Docs</nav><!--weft:outlet-->");
  assert_eq!(inner.select(Some("zh")), "<nav>Wendang</nav><!--weft:outlet-->");

  assert_eq!(pages[1].route, "/plain");
  assert!(pages[1].layout_chain[0].shell.is_none());
}
