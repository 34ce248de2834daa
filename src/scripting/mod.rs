//! Script Runtime (C8, spec.md §4.8): one sandboxed Rhai engine+AST pair per
//! extension, with a curated `marasi` global namespace and a denylist of native
//! capabilities.

pub mod convert;
pub mod crypto;
pub mod encoding;
pub mod random;
pub mod repo;
pub mod settings;
pub mod strings;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use rhai::{Dynamic, Engine, Scope as RhaiScope, AST};
use tracing::{error, info, warn};

use crate::bridge::{Cookie, Header, Request, RequestBuilder, Response, ScopeHandle, Url};
use crate::error::{MarasiError, Result};
use crate::persistence::Persistence;
use crate::proxy::client::OutboundClient;
use crate::scope::Scope;

/// The compiled, reusable half of a [`ScriptRuntime`]; held behind a per-extension
/// mutex so concurrent dispatches to the same extension serialize (spec.md §5).
pub struct ScriptState {
    pub engine: Engine,
    pub ast: AST,
}

#[derive(Clone)]
pub struct ScriptRuntime {
    extension_id: String,
    #[allow(dead_code)]
    extension_name: String,
    state: Arc<tokio::sync::Mutex<ScriptState>>,
    log_buffer: Arc<parking_lot::Mutex<Vec<(String, String)>>>,
    marasi: MarasiNamespace,
}

/// Denylist/allowlist boundary (spec.md §4.8): `Engine::new()` only carries Rhai's
/// own arithmetic/string/array/map packages — no filesystem, process, or network
/// access exists to remove. We additionally disable `eval` (dynamic code loading)
/// and cap resource use so a runaway or malicious script cannot stall the process.
fn sandbox_limits(engine: &mut Engine) {
    engine.disable_symbol("eval");
    engine.set_max_operations(10_000_000);
    engine.set_max_call_levels(64);
    engine.set_max_string_size(16 * 1024 * 1024);
    engine.set_max_array_size(1_000_000);
    engine.set_max_map_size(1_000_000);
}

impl ScriptRuntime {
    /// Compiles `source` and runs the top-level once to define globals
    /// (spec.md §4.8), wiring the full `marasi` namespace.
    #[allow(clippy::too_many_arguments)]
    pub fn compile(
        source: &str,
        extension_id: String,
        extension_name: String,
        config_dir: PathBuf,
        scope: Scope,
        persistence: Arc<dyn Persistence>,
        outbound_client: Arc<OutboundClient>,
    ) -> Result<Self> {
        let mut engine = Engine::new();
        sandbox_limits(&mut engine);
        register_bridge_types(&mut engine);
        register_namespace_types(&mut engine);

        let log_buffer = Arc::new(parking_lot::Mutex::new(Vec::new()));

        // Overridden `print`: appends to the extension's in-memory log buffer and
        // the tracing subscriber (spec.md §4.8).
        {
            let extension_id = extension_id.clone();
            let log_buffer = log_buffer.clone();
            engine.on_print(move |text| {
                record_log(&extension_id, &log_buffer, text, "INFO");
            });
        }
        // Created empty, then filled in below once the AST is compiled, so the
        // builder's `send_async` callback can re-enter this exact engine+ast pair.
        let state = Arc::new(tokio::sync::Mutex::new(ScriptState {
            engine: Engine::new(),
            ast: AST::empty(),
        }));

        let marasi = MarasiNamespace {
            extension_id: extension_id.clone(),
            extension_name: extension_name.clone(),
            config_dir: config_dir.display().to_string(),
            scope,
            persistence,
            outbound_client,
            log_buffer: log_buffer.clone(),
            script_state: state.clone(),
        };

        let ast = engine.compile(source).map_err(|e| MarasiError::ScriptError {
            extension_id: extension_id.clone(),
            message: e.to_string(),
        })?;

        {
            let mut guard = state
                .try_lock()
                .expect("freshly constructed ScriptState has no other holders");
            guard.engine = engine;
            guard.ast = ast;
        }

        let runtime = ScriptRuntime {
            extension_id,
            extension_name,
            state,
            log_buffer,
            marasi,
        };
        runtime.run_top_level()?;
        Ok(runtime)
    }

    /// A fresh scope carrying the `marasi` global every hook invocation needs —
    /// pushed as a constant so `marasi.log(...)`/`marasi.strings.upper(...)` resolve
    /// as method/property calls on a real registered type (spec.md §4.8), not as
    /// `::`-path static-module lookups.
    fn fresh_scope(&self) -> RhaiScope<'static> {
        let mut scope = RhaiScope::new();
        scope.push_constant("marasi", self.marasi.clone());
        scope
    }

    fn run_top_level(&self) -> Result<()> {
        let state = self.state.blocking_lock();
        let mut scope = self.fresh_scope();
        state
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &state.ast)
            .map(|_| ())
            .map_err(|e| MarasiError::ScriptError {
                extension_id: self.extension_id.clone(),
                message: e.to_string(),
            })
    }

    fn has_fn(ast: &AST, name: &str) -> bool {
        ast.iter_functions().any(|f| f.name == name)
    }

    /// Invokes `startup()` once at load, if defined.
    pub async fn call_startup(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !Self::has_fn(&state.ast, "startup") {
            return Ok(());
        }
        let mut scope = self.fresh_scope();
        state
            .engine
            .call_fn::<Dynamic>(&mut scope, &state.ast, "startup", ())
            .map(|_| ())
            .map_err(|e| self.contain_error(e))
    }

    /// `interceptRequest(req)` / `interceptResponse(res)`: return `true` to mark
    /// the transaction `intercepted` (spec.md §4.7).
    pub async fn call_intercept(&self, is_request: bool, arg: Dynamic) -> Result<bool> {
        let fn_name = if is_request { "interceptRequest" } else { "interceptResponse" };
        let mut state = self.state.lock().await;
        if !Self::has_fn(&state.ast, fn_name) {
            return Ok(false);
        }
        let mut scope = self.fresh_scope();
        let result = state
            .engine
            .call_fn::<Dynamic>(&mut scope, &state.ast, fn_name, (arg,))
            .map_err(|e| self.contain_error(e))?;
        Ok(result.as_bool().unwrap_or(false))
    }

    /// `processRequest(req)` / `processResponse(res)`.
    pub async fn call_process(&self, is_request: bool, arg: Dynamic) -> Result<()> {
        let fn_name = if is_request { "processRequest" } else { "processResponse" };
        let mut state = self.state.lock().await;
        if !Self::has_fn(&state.ast, fn_name) {
            return Ok(());
        }
        let mut scope = self.fresh_scope();
        state
            .engine
            .call_fn::<Dynamic>(&mut scope, &state.ast, fn_name, (arg,))
            .map(|_| ())
            .map_err(|e| self.contain_error(e))
    }

    /// Errors raised from script execution are logged with the extension id; the
    /// caller (the extension manager's dispatch loop) decides whether to continue
    /// to the next extension (spec.md §4.7).
    fn contain_error(&self, e: Box<rhai::EvalAltResult>) -> MarasiError {
        error!(extension_id = %self.extension_id, error = %e, "extension script error");
        MarasiError::ScriptError {
            extension_id: self.extension_id.clone(),
            message: e.to_string(),
        }
    }

    /// Drains the buffer `marasi.log`/`print` have appended to since the last
    /// drain, as `(level, formatted_line)` pairs — the level travels separately so
    /// callers persisting through `Persistence::insert_log` don't have to re-parse
    /// the `record_log` line format to recover it.
    pub fn drain_log_entries(&self) -> Vec<(String, String)> {
        std::mem::take(&mut self.log_buffer.lock())
    }

    pub fn drain_logs(&self) -> Vec<String> {
        self.drain_log_entries().into_iter().map(|(_, line)| line).collect()
    }
}

fn register_bridge_types(engine: &mut Engine) {
    engine
        .register_type_with_name::<Header>("Header")
        .register_fn("get", Header::get)
        .register_fn("values", Header::values)
        .register_fn("set", Header::set)
        .register_fn("add", Header::add)
        .register_fn("delete", Header::delete)
        .register_fn("has", Header::has)
        .register_fn("to_table", Header::to_table);

    engine
        .register_type_with_name::<Cookie>("Cookie")
        .register_get_set("name", Cookie::name, Cookie::set_name)
        .register_get_set("value", Cookie::value, Cookie::set_value)
        .register_get_set("domain", Cookie::domain, Cookie::set_domain)
        .register_get_set("path", Cookie::path, Cookie::set_path)
        .register_get_set("secure", Cookie::secure, Cookie::set_secure)
        .register_get_set("http_only", Cookie::http_only, Cookie::set_http_only)
        .register_get_set("max_age", Cookie::max_age, Cookie::set_max_age)
        .register_get_set("same_site", Cookie::same_site, Cookie::set_same_site)
        .register_get_set("expires", Cookie::expires, Cookie::set_expires)
        .register_fn("serialize", Cookie::serialize);

    engine
        .register_type_with_name::<Url>("Url")
        .register_fn("string", Url::string)
        .register_get_set("scheme", Url::scheme, Url::set_scheme)
        .register_get_set("host", Url::host, Url::set_host)
        .register_get_set("path", Url::path, Url::set_path)
        .register_fn("query", Url::query)
        .register_fn("get_param", Url::get_param)
        .register_fn("set_param", Url::set_param)
        .register_fn("del_param", Url::del_param);

    engine
        .register_type_with_name::<Request>("Request")
        .register_fn("id", Request::id)
        .register_get_set("method", Request::method, Request::set_method)
        .register_get_set("url", Request::url, Request::set_url)
        .register_fn("path", Request::path)
        .register_get_set("host", Request::host, Request::set_host)
        .register_fn("scheme", Request::scheme)
        .register_fn("proto", Request::proto)
        .register_fn("remote_addr", Request::remote_addr)
        .register_get_set("body", Request::body, Request::set_body)
        .register_fn("headers", Request::headers)
        .register_fn("content_type", Request::content_type)
        .register_fn("cookie", Request::cookie)
        .register_fn("cookies", Request::cookies)
        .register_fn("metadata", Request::metadata)
        .register_fn("set_metadata", Request::set_metadata)
        .register_fn("drop", Request::drop)
        .register_fn("skip", Request::skip);

    engine
        .register_type_with_name::<Response>("Response")
        .register_fn("id", Response::id)
        .register_fn("status", Response::status)
        .register_get_set("status_code", Response::status_code, Response::set_status_code)
        .register_fn("length", Response::length)
        .register_get_set("body", Response::body, Response::set_body)
        .register_fn("headers", Response::headers)
        .register_fn("content_type", Response::content_type)
        .register_fn("cookies", Response::cookies)
        .register_fn("metadata", Response::metadata)
        .register_fn("set_metadata", Response::set_metadata)
        .register_fn("drop", Response::drop)
        .register_fn("skip", Response::skip);

    engine
        .register_type_with_name::<RequestBuilder>("RequestBuilder")
        .register_fn("set_method", RequestBuilder::set_method)
        .register_fn("set_url", RequestBuilder::set_url)
        .register_fn("set_url", RequestBuilder::set_url_object)
        .register_fn("set_body", RequestBuilder::set_body)
        .register_fn("set_headers", RequestBuilder::set_headers)
        .register_fn("add_header", RequestBuilder::add_header)
        .register_fn("set_cookie", RequestBuilder::set_cookie)
        .register_fn("set_cookies", RequestBuilder::set_cookies)
        .register_fn("set_metadata", RequestBuilder::set_metadata)
        .register_fn("send", RequestBuilder::send)
        .register_fn("send_async", RequestBuilder::send_async);

    engine
        .register_type_with_name::<ScopeHandle>("Scope")
        .register_fn("add_include_host", ScopeHandle::add_include_host)
        .register_fn("add_include_url", ScopeHandle::add_include_url)
        .register_fn("add_exclude_host", ScopeHandle::add_exclude_host)
        .register_fn("add_exclude_url", ScopeHandle::add_exclude_url)
        .register_fn("remove_include_host", ScopeHandle::remove_include_host)
        .register_fn("remove_include_url", ScopeHandle::remove_include_url)
        .register_fn("remove_exclude_host", ScopeHandle::remove_exclude_host)
        .register_fn("remove_exclude_url", ScopeHandle::remove_exclude_url)
        .register_fn("clear", ScopeHandle::clear)
        .register_fn("set_default_allow", ScopeHandle::set_default_allow)
        .register_fn("matches_host", ScopeHandle::matches_host)
        .register_fn("matches_url", ScopeHandle::matches_url)
        .register_fn("matches", ScopeHandle::matches_request)
        .register_fn("matches", ScopeHandle::matches_response);
}

/// The `marasi` global itself: a real Rhai type (not a `::`-path static module), so
/// `marasi.log(...)`, `marasi.builder()` and the nested `marasi.strings.upper(...)`
/// dot-chains all resolve as ordinary method/property calls on a registered type
/// (spec.md §4.8). Pushed into each hook invocation's scope as a constant by
/// [`ScriptRuntime::fresh_scope`].
#[derive(Clone)]
struct MarasiNamespace {
    extension_id: String,
    extension_name: String,
    config_dir: String,
    scope: Scope,
    persistence: Arc<dyn Persistence>,
    outbound_client: Arc<OutboundClient>,
    log_buffer: Arc<parking_lot::Mutex<Vec<(String, String)>>>,
    script_state: Arc<tokio::sync::Mutex<ScriptState>>,
}

impl MarasiNamespace {
    fn log(&mut self, message: &str) {
        record_log(&self.extension_id, &self.log_buffer, message, "INFO");
    }

    fn log_leveled(&mut self, message: &str, level: &str) {
        record_log(&self.extension_id, &self.log_buffer, message, level);
    }

    fn config(&mut self) -> String {
        self.config_dir.clone()
    }

    fn scope_handle(&mut self) -> ScopeHandle {
        ScopeHandle::new(self.scope.clone())
    }

    fn builder(&mut self) -> RequestBuilder {
        RequestBuilder::new(
            self.outbound_client.clone(),
            self.extension_id.clone(),
            self.extension_name.clone(),
            self.script_state.clone(),
        )
    }

    fn builder_from_request(&mut self, request: Request) -> RequestBuilder {
        RequestBuilder::from_request(
            self.outbound_client.clone(),
            self.extension_id.clone(),
            self.extension_name.clone(),
            self.script_state.clone(),
            &request.handle(),
        )
    }

    fn strings_ns(&mut self) -> StringsNamespace {
        StringsNamespace
    }

    fn random_ns(&mut self) -> RandomNamespace {
        RandomNamespace
    }

    fn utils_ns(&mut self) -> UtilsNamespace {
        UtilsNamespace
    }

    fn encoding_ns(&mut self) -> EncodingNamespace {
        EncodingNamespace
    }

    fn crypto_ns(&mut self) -> CryptoNamespace {
        CryptoNamespace
    }

    fn settings_ns(&mut self) -> settings::SettingsNamespace {
        settings::SettingsNamespace::new(self.persistence.clone(), self.extension_id.clone())
    }

    fn repo_ns(&mut self) -> repo::RepoNamespace {
        repo::RepoNamespace::new(self.persistence.clone())
    }
}

#[derive(Clone, Copy)]
struct StringsNamespace;

impl StringsNamespace {
    fn upper(&mut self, s: &str) -> String {
        strings::upper(s)
    }
    fn lower(&mut self, s: &str) -> String {
        strings::lower(s)
    }
    fn reverse(&mut self, s: &str) -> String {
        strings::reverse(s)
    }
    fn len(&mut self, s: &str) -> i64 {
        strings::len(s)
    }
    fn replace(&mut self, s: &str, from: &str, to: &str) -> String {
        strings::replace(s, from, to)
    }
    fn contains(&mut self, s: &str, needle: &str) -> bool {
        strings::contains(s, needle)
    }
    fn has_prefix(&mut self, s: &str, prefix: &str) -> bool {
        strings::has_prefix(s, prefix)
    }
    fn has_suffix(&mut self, s: &str, suffix: &str) -> bool {
        strings::has_suffix(s, suffix)
    }
    fn split(&mut self, s: &str, sep: &str) -> Vec<Dynamic> {
        strings::split(s, sep)
    }
    fn trim(&mut self, s: &str) -> String {
        strings::trim(s)
    }
    fn substring(&mut self, s: &str, start: i64, len: i64) -> String {
        strings::substring(s, start, len)
    }
}

#[derive(Clone, Copy)]
struct RandomNamespace;

impl RandomNamespace {
    fn int(&mut self, min: i64, max: i64) -> i64 {
        random::int(min, max)
    }
    fn string(&mut self, len: i64, charset: &str) -> String {
        random::string(len, charset)
    }
}

#[derive(Clone, Copy)]
struct UtilsNamespace;

impl UtilsNamespace {
    fn uuid(&mut self) -> String {
        utils::uuid()
    }
    fn timestamp(&mut self) -> i64 {
        utils::timestamp()
    }
    fn sleep(&mut self, ms: i64) {
        utils::sleep(ms, None);
    }
    fn sleep_capped(&mut self, ms: i64, cap: i64) {
        utils::sleep(ms, Some(cap));
    }
    fn cookie(&mut self, name: &str, value: &str) -> Cookie {
        utils::cookie(name, value)
    }
    fn url(&mut self, raw: &str) -> Url {
        utils::url(raw)
    }
}

#[derive(Clone, Copy)]
struct EncodingNamespace;

impl EncodingNamespace {
    fn base64_ns(&mut self) -> Base64Namespace {
        Base64Namespace
    }
    fn hex_ns(&mut self) -> HexNamespace {
        HexNamespace
    }
    fn url_ns(&mut self) -> UrlEncodingNamespace {
        UrlEncodingNamespace
    }
    fn html_ns(&mut self) -> HtmlNamespace {
        HtmlNamespace
    }
    fn json_ns(&mut self) -> JsonNamespace {
        JsonNamespace
    }
}

#[derive(Clone, Copy)]
struct Base64Namespace;

impl Base64Namespace {
    fn encode(&mut self, s: &str) -> String {
        encoding::base64_codec::encode(s)
    }
    fn decode(&mut self, s: &str) -> String {
        encoding::base64_codec::decode(s)
    }
}

#[derive(Clone, Copy)]
struct HexNamespace;

impl HexNamespace {
    fn encode(&mut self, s: &str) -> String {
        encoding::hex_codec::encode(s)
    }
    fn decode(&mut self, s: &str) -> String {
        encoding::hex_codec::decode(s)
    }
}

#[derive(Clone, Copy)]
struct UrlEncodingNamespace;

impl UrlEncodingNamespace {
    fn encode(&mut self, s: &str) -> String {
        encoding::url_codec::encode(s)
    }
    fn decode(&mut self, s: &str) -> String {
        encoding::url_codec::decode(s)
    }
}

#[derive(Clone, Copy)]
struct HtmlNamespace;

impl HtmlNamespace {
    fn encode(&mut self, s: &str) -> String {
        encoding::html_codec::encode(s)
    }
    fn decode(&mut self, s: &str) -> String {
        encoding::html_codec::decode(s)
    }
}

#[derive(Clone, Copy)]
struct JsonNamespace;

impl JsonNamespace {
    fn encode(&mut self, v: Dynamic) -> String {
        encoding::json_codec::encode(v)
    }
    fn decode(&mut self, s: &str) -> Dynamic {
        encoding::json_codec::decode(s)
    }
}

#[derive(Clone, Copy)]
struct CryptoNamespace;

impl CryptoNamespace {
    fn md5(&mut self, s: &str) -> String {
        crypto::md5(s)
    }
    fn sha1(&mut self, s: &str) -> String {
        crypto::sha1(s)
    }
    fn sha256(&mut self, s: &str) -> String {
        crypto::sha256(s)
    }
    fn hmac_sha256(&mut self, key: &str, s: &str) -> String {
        crypto::hmac_sha256(key, s)
    }
    fn aes_ns(&mut self) -> AesNamespace {
        AesNamespace
    }
    fn rsa_ns(&mut self) -> RsaNamespace {
        RsaNamespace
    }
    fn ed25519_ns(&mut self) -> Ed25519Namespace {
        Ed25519Namespace
    }
}

#[derive(Clone, Copy)]
struct AesNamespace;

impl AesNamespace {
    fn generate_key(&mut self, bits: i64) -> String {
        crypto::aes_utils::generate_key(bits)
    }
    fn gcm_ns(&mut self) -> AesGcmNamespace {
        AesGcmNamespace
    }
    fn cbc_ns(&mut self) -> AesCbcNamespace {
        AesCbcNamespace
    }
}

#[derive(Clone, Copy)]
struct AesGcmNamespace;

impl AesGcmNamespace {
    fn generate_iv(&mut self, len: i64) -> String {
        crypto::aes_utils::generate_iv(len)
    }
    fn encrypt(&mut self, key: &str, iv: &str, pt: &str) -> String {
        crypto::aes_utils::gcm::encrypt(key, iv, pt)
    }
    fn decrypt(&mut self, key: &str, iv: &str, ct: &str) -> String {
        crypto::aes_utils::gcm::decrypt(key, iv, ct)
    }
}

#[derive(Clone, Copy)]
struct AesCbcNamespace;

impl AesCbcNamespace {
    fn generate_iv(&mut self, len: i64) -> String {
        crypto::aes_utils::generate_iv(len)
    }
    fn encrypt(&mut self, key: &str, iv: &str, pt: &str) -> String {
        crypto::aes_utils::cbc_mode::encrypt(key, iv, pt)
    }
    fn decrypt(&mut self, key: &str, iv: &str, ct: &str) -> String {
        crypto::aes_utils::cbc_mode::decrypt(key, iv, ct)
    }
}

#[derive(Clone, Copy)]
struct RsaNamespace;

impl RsaNamespace {
    fn generate_pair(&mut self, bits: i64) -> rhai::Map {
        let (public, private) = crypto::rsa_utils::generate_pair(bits);
        let mut out = rhai::Map::new();
        out.insert("public".into(), Dynamic::from(public));
        out.insert("private".into(), Dynamic::from(private));
        out
    }
    fn encrypt(&mut self, public: &str, pt: &str) -> String {
        crypto::rsa_utils::encrypt(public, pt)
    }
    fn decrypt(&mut self, private: &str, ct: &str) -> String {
        crypto::rsa_utils::decrypt(private, ct)
    }
}

#[derive(Clone, Copy)]
struct Ed25519Namespace;

impl Ed25519Namespace {
    fn generate_pair(&mut self) -> rhai::Map {
        let (public, secret) = crypto::ed25519_utils::generate_pair();
        let mut out = rhai::Map::new();
        out.insert("public".into(), Dynamic::from(public));
        out.insert("secret".into(), Dynamic::from(secret));
        out
    }
    fn sign(&mut self, secret: &str, msg: &str) -> String {
        crypto::ed25519_utils::sign(secret, msg)
    }
    fn verify(&mut self, public: &str, msg: &str, sig: &str) -> bool {
        crypto::ed25519_utils::verify(public, msg, sig)
    }
}

fn register_namespace_types(engine: &mut Engine) {
    engine
        .register_type_with_name::<MarasiNamespace>("Marasi")
        .register_fn("log", MarasiNamespace::log)
        .register_fn("log", MarasiNamespace::log_leveled)
        .register_fn("config", MarasiNamespace::config)
        .register_fn("scope", MarasiNamespace::scope_handle)
        .register_fn("builder", MarasiNamespace::builder)
        .register_fn("builder", MarasiNamespace::builder_from_request)
        .register_get("strings", MarasiNamespace::strings_ns)
        .register_get("random", MarasiNamespace::random_ns)
        .register_get("utils", MarasiNamespace::utils_ns)
        .register_get("encoding", MarasiNamespace::encoding_ns)
        .register_get("crypto", MarasiNamespace::crypto_ns)
        .register_get("settings", MarasiNamespace::settings_ns)
        .register_get("repo", MarasiNamespace::repo_ns);

    engine
        .register_type_with_name::<StringsNamespace>("StringsNamespace")
        .register_fn("upper", StringsNamespace::upper)
        .register_fn("lower", StringsNamespace::lower)
        .register_fn("reverse", StringsNamespace::reverse)
        .register_fn("len", StringsNamespace::len)
        .register_fn("replace", StringsNamespace::replace)
        .register_fn("contains", StringsNamespace::contains)
        .register_fn("has_prefix", StringsNamespace::has_prefix)
        .register_fn("has_suffix", StringsNamespace::has_suffix)
        .register_fn("split", StringsNamespace::split)
        .register_fn("trim", StringsNamespace::trim)
        .register_fn("substring", StringsNamespace::substring);

    engine
        .register_type_with_name::<RandomNamespace>("RandomNamespace")
        .register_fn("int", RandomNamespace::int)
        .register_fn("string", RandomNamespace::string);

    engine
        .register_type_with_name::<UtilsNamespace>("UtilsNamespace")
        .register_fn("uuid", UtilsNamespace::uuid)
        .register_fn("timestamp", UtilsNamespace::timestamp)
        .register_fn("sleep", UtilsNamespace::sleep)
        .register_fn("sleep", UtilsNamespace::sleep_capped)
        .register_fn("cookie", UtilsNamespace::cookie)
        .register_fn("url", UtilsNamespace::url);

    engine
        .register_type_with_name::<EncodingNamespace>("EncodingNamespace")
        .register_get("base64", EncodingNamespace::base64_ns)
        .register_get("hex", EncodingNamespace::hex_ns)
        .register_get("url", EncodingNamespace::url_ns)
        .register_get("html", EncodingNamespace::html_ns)
        .register_get("json", EncodingNamespace::json_ns);

    engine
        .register_type_with_name::<Base64Namespace>("Base64Namespace")
        .register_fn("encode", Base64Namespace::encode)
        .register_fn("decode", Base64Namespace::decode);
    engine
        .register_type_with_name::<HexNamespace>("HexNamespace")
        .register_fn("encode", HexNamespace::encode)
        .register_fn("decode", HexNamespace::decode);
    engine
        .register_type_with_name::<UrlEncodingNamespace>("UrlEncodingNamespace")
        .register_fn("encode", UrlEncodingNamespace::encode)
        .register_fn("decode", UrlEncodingNamespace::decode);
    engine
        .register_type_with_name::<HtmlNamespace>("HtmlNamespace")
        .register_fn("encode", HtmlNamespace::encode)
        .register_fn("decode", HtmlNamespace::decode);
    engine
        .register_type_with_name::<JsonNamespace>("JsonNamespace")
        .register_fn("encode", JsonNamespace::encode)
        .register_fn("decode", JsonNamespace::decode);

    engine
        .register_type_with_name::<CryptoNamespace>("CryptoNamespace")
        .register_fn("md5", CryptoNamespace::md5)
        .register_fn("sha1", CryptoNamespace::sha1)
        .register_fn("sha256", CryptoNamespace::sha256)
        .register_fn("hmac_sha256", CryptoNamespace::hmac_sha256)
        .register_get("aes", CryptoNamespace::aes_ns)
        .register_get("rsa", CryptoNamespace::rsa_ns)
        .register_get("ed25519", CryptoNamespace::ed25519_ns);

    engine
        .register_type_with_name::<AesNamespace>("AesNamespace")
        .register_fn("generate_key", AesNamespace::generate_key)
        .register_get("gcm", AesNamespace::gcm_ns)
        .register_get("cbc", AesNamespace::cbc_ns);
    engine
        .register_type_with_name::<AesGcmNamespace>("AesGcmNamespace")
        .register_fn("generate_iv", AesGcmNamespace::generate_iv)
        .register_fn("encrypt", AesGcmNamespace::encrypt)
        .register_fn("decrypt", AesGcmNamespace::decrypt);
    engine
        .register_type_with_name::<AesCbcNamespace>("AesCbcNamespace")
        .register_fn("generate_iv", AesCbcNamespace::generate_iv)
        .register_fn("encrypt", AesCbcNamespace::encrypt)
        .register_fn("decrypt", AesCbcNamespace::decrypt);
    engine
        .register_type_with_name::<RsaNamespace>("RsaNamespace")
        .register_fn("generate_pair", RsaNamespace::generate_pair)
        .register_fn("encrypt", RsaNamespace::encrypt)
        .register_fn("decrypt", RsaNamespace::decrypt);
    engine
        .register_type_with_name::<Ed25519Namespace>("Ed25519Namespace")
        .register_fn("generate_pair", Ed25519Namespace::generate_pair)
        .register_fn("sign", Ed25519Namespace::sign)
        .register_fn("verify", Ed25519Namespace::verify);

    engine
        .register_type_with_name::<settings::SettingsNamespace>("SettingsNamespace")
        .register_fn("get", settings::SettingsNamespace::get)
        .register_fn("set", settings::SettingsNamespace::set);

    engine
        .register_type_with_name::<repo::RepoNamespace>("RepoNamespace")
        .register_fn("get_summary", repo::RepoNamespace::get_summary)
        .register_fn("get_details", repo::RepoNamespace::get_details)
        .register_fn("get_metadata", repo::RepoNamespace::get_metadata)
        .register_fn("set_metadata", repo::RepoNamespace::set_metadata)
        .register_fn("get_note", repo::RepoNamespace::get_note)
        .register_fn("set_note", repo::RepoNamespace::set_note)
        .register_fn("search_by_metadata", repo::RepoNamespace::search_by_metadata);
}

fn record_log(
    extension_id: &str,
    buffer: &Arc<parking_lot::Mutex<Vec<(String, String)>>>,
    message: &str,
    level: &str,
) {
    let level = level.to_uppercase();
    let line = format!("[{level}] {extension_id}: {message}");
    buffer.lock().push((level.clone(), line));
    match level.as_str() {
        "ERROR" => error!(extension_id, "{message}"),
        "WARN" => warn!(extension_id, "{message}"),
        _ => info!(extension_id, "{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config_dir;
    use crate::persistence::SqlitePersistence;

    async fn test_runtime(source: &str) -> ScriptRuntime {
        let persistence: Arc<dyn Persistence> =
            Arc::new(SqlitePersistence::connect(std::path::Path::new(":memory:")).await.unwrap());
        let client = Arc::new(OutboundClient::new(&crate::config::ConnectionPoolConfig::default()));
        ScriptRuntime::compile(
            source,
            "ext-1".to_string(),
            "test-extension".to_string(),
            default_config_dir(),
            Scope::new(),
            persistence,
            client,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn startup_hook_runs_when_defined() {
        let runtime = test_runtime(
            r#"
            fn startup() {
                marasi.log("booted");
            }
        "#,
        )
        .await;
        assert!(runtime.call_startup().await.is_ok());
        assert!(runtime.drain_logs().iter().any(|l| l.contains("booted")));
    }

    #[tokio::test]
    async fn missing_hooks_are_no_ops() {
        let runtime = test_runtime("let x = 1;").await;
        assert!(runtime.call_startup().await.is_ok());
    }

    #[tokio::test]
    async fn intercept_hook_returns_declared_bool() {
        let runtime = test_runtime(
            r#"
            fn interceptRequest(req) {
                true
            }
        "#,
        )
        .await;
        let result = runtime.call_intercept(true, Dynamic::UNIT).await.unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn dot_chain_nested_namespaces_resolve() {
        let runtime = test_runtime(
            r#"
            fn startup() {
                let upper = marasi.strings.upper("abc");
                let digest = marasi.crypto.md5("abc");
                let encoded = marasi.encoding.base64.encode("abc");
                if upper != "ABC" { marasi.log("strings mismatch", "ERROR"); }
                if digest != "900150983cd24fb0d6963f7d28e17f72" { marasi.log("crypto mismatch", "ERROR"); }
                if encoded != "YWJj" { marasi.log("encoding mismatch", "ERROR"); }
            }
        "#,
        )
        .await;
        assert!(runtime.call_startup().await.is_ok());
        let logs = runtime.drain_logs();
        assert!(logs.is_empty(), "unexpected log lines: {logs:?}");
    }

    #[tokio::test]
    async fn settings_and_repo_namespaces_are_reachable_via_dot_chain() {
        let runtime = test_runtime(
            r#"
            fn startup() {
                let table = #{};
                marasi.settings.set(table);
                let fetched = marasi.settings.get();
                let rows = marasi.repo.get_summary();
                marasi.log("settings and repo reachable");
            }
        "#,
        )
        .await;
        assert!(runtime.call_startup().await.is_ok());
        assert!(runtime.drain_logs().iter().any(|l| l.contains("settings and repo reachable")));
    }

    #[tokio::test]
    async fn aes_gcm_nested_namespace_round_trips_through_script() {
        let runtime = test_runtime(
            r#"
            fn startup() {
                let key = marasi.crypto.aes.generate_key(256);
                let iv = marasi.crypto.aes.gcm.generate_iv(12);
                let ct = marasi.crypto.aes.gcm.encrypt(key, iv, "top secret");
                let pt = marasi.crypto.aes.gcm.decrypt(key, iv, ct);
                if pt != "top secret" { marasi.log("round trip failed", "ERROR"); }
            }
        "#,
        )
        .await;
        assert!(runtime.call_startup().await.is_ok());
        let logs = runtime.drain_logs();
        assert!(logs.is_empty(), "unexpected log lines: {logs:?}");
    }
}
