//! IPC message dispatch — parse s-expressions and route to handlers.

use lexpr::Value;
use tracing::{debug, info, warn};

use super::plist::{
    entries, escape_string, get_float, get_int, get_keyword, get_string, get_value, list_texts,
    value_text,
};
use crate::adaptive::affect::ExpressionVector;
use crate::adaptive::dwell::PointSample;
use crate::adaptive::grid::Rect;
use crate::adaptive::method_tracker::InputMethod;
use crate::adaptive::{ControllerEvent, Rejection, SampleSpace};
use crate::state::AacState;

/// Keys of the message envelope, never payload.
const ENVELOPE_KEYS: [&str; 2] = ["type", "id"];

/// Parse an s-expression message and dispatch to the appropriate handler.
/// Returns an optional response string (s-expression).
pub fn handle_message(state: &mut AacState, client_id: u64, raw: &str) -> Option<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(client_id, "malformed s-expression: {}", e);
            return Some(error_response(0, &format!("malformed s-expression: {e}")));
        }
    };

    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);

    // Check authentication (hello must be first message)
    let is_authenticated = state
        .ipc_server
        .clients
        .get(&client_id)
        .map(|c| c.authenticated)
        .unwrap_or(false);

    match msg_type.as_deref() {
        Some("hello") => handle_hello(state, client_id, msg_id, &value),
        _ if !is_authenticated => Some(error_response(msg_id, "hello handshake required")),
        Some("ping") => handle_ping(state, msg_id, &value),
        // Input mode
        Some("mode-set") => handle_mode_set(state, msg_id, &value),
        Some("mode-status") => handle_mode_status(state, msg_id),
        // Sensor input
        Some("gaze-sample") | Some("pointer-sample") => handle_point_sample(state, msg_id, &value),
        Some("gaze-lost") => handle_gaze_lost(state, msg_id, &value),
        Some("activate") => handle_activate(state, msg_id, &value),
        Some("switch-next") => handle_switch_next(state, msg_id),
        Some("switch-select") => handle_switch_select(state, msg_id),
        Some("expression") => handle_expression(state, msg_id, &value),
        Some("expression-unavailable") => handle_expression_unavailable(state, msg_id),
        // Board and blocklist
        Some("board-set") => handle_board_set(state, msg_id, &value),
        Some("grid-set-geometry") => handle_grid_set_geometry(state, msg_id, &value),
        Some("board-status") => handle_board_status(state, msg_id),
        Some("blocklist-add") => handle_blocklist_add(state, msg_id, &value),
        Some("blocklist-remove") => handle_blocklist_remove(state, msg_id, &value),
        Some("blocklist-set") => handle_blocklist_set(state, msg_id, &value),
        Some("blocklist-list") => handle_blocklist_list(state, msg_id),
        // Phrase
        Some("phrase-status") => handle_phrase_status(state, msg_id),
        Some("phrase-clear") => handle_phrase_clear(state, msg_id),
        Some("phrase-undo") => handle_phrase_undo(state, msg_id),
        // Method tracker and affect
        Some("method-status") => handle_method_status(state, msg_id),
        Some("method-reset") => handle_method_reset(state, msg_id),
        Some("affect-status") => handle_affect_status(state, msg_id),
        // Configuration
        Some("config") => handle_config(state, msg_id),
        Some("config-set") => handle_config_set(state, msg_id, &value),
        // IPC security
        Some("ipc-client-info") => handle_ipc_client_info(state, client_id, msg_id),
        Some("ipc-rate-limit") => handle_ipc_rate_limit(state, client_id, msg_id, &value),
        Some(other) => Some(error_response(
            msg_id,
            &format!("unknown message type: {other}"),
        )),
        None => Some(error_response(msg_id, "missing :type field")),
    }
}

// ── Handlers ────────────────────────────────────────────────

fn handle_hello(
    state: &mut AacState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let version = get_int(value, "version").unwrap_or(0);
    if version != 1 {
        return Some(error_response(
            msg_id,
            &format!("unsupported protocol version: {version}"),
        ));
    }

    // SO_PEERCRED: only the daemon's own user may connect.
    if let Some(client) = state.ipc_server.clients.get(&client_id) {
        if let Some(peer_uid) = client.peer_uid {
            let our_uid = unsafe { libc::getuid() };
            if peer_uid != our_uid {
                warn!(
                    client_id,
                    peer_uid,
                    our_uid,
                    "rejecting client: UID mismatch"
                );
                return Some(error_response(msg_id, "authentication failed: UID mismatch"));
            }
        }
    }

    let client_name = get_string(value, "client").unwrap_or_default();
    debug!(client_id, client_name, "hello handshake (authenticated)");

    let mut peer_pid = None;
    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
        client.authenticated = true;
        client.name = (!client_name.is_empty()).then_some(client_name);
        peer_pid = client.peer_pid;
    }

    let pid_field = peer_pid
        .map(|p| format!(" :peer-pid {}", p))
        .unwrap_or_default();
    Some(format!(
        "(:type :hello :id {} :version 1 :server \"aacd\" :features (:modes (:touch :switches :eye) :speech {}){})",
        msg_id,
        if state.config.speech_command.is_some() { "t" } else { "nil" },
        pid_field
    ))
}

fn handle_ping(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let client_ts = get_int(value, "timestamp").unwrap_or(0);
    let server_ts = state.clock.unix_millis();

    Some(format!(
        "(:type :response :id {} :status :ok :client-timestamp {} :server-timestamp {})",
        msg_id, client_ts, server_ts
    ))
}

fn handle_mode_set(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let mode_str = get_keyword(value, "mode").unwrap_or_default();
    let Some(mode) = InputMethod::from_str(&mode_str) else {
        return Some(error_response(
            msg_id,
            &format!("invalid :mode (use touch, switches, eye): {mode_str}"),
        ));
    };
    let events = state.controller.set_mode(mode);
    state.queue_events(events);
    Some(format!(
        "(:type :response :id {} :status :ok :mode :{})",
        msg_id,
        mode.as_str()
    ))
}

fn handle_mode_status(state: &mut AacState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :input {})",
        msg_id,
        state.controller.mode_status_sexp()
    ))
}

fn handle_point_sample(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let (Some(x), Some(y)) = (get_float(value, "x"), get_float(value, "y")) else {
        return Some(error_response(msg_id, "missing :x or :y"));
    };
    let now = state.clock.now_ms();
    let timestamp = get_float(value, "timestamp").unwrap_or(now);
    let stream = match get_int(value, "stream") {
        Some(s) if s >= 0 => s as u64,
        Some(_) => return Some(error_response(msg_id, "invalid :stream")),
        None => 0,
    };
    let space = match get_keyword(value, "space") {
        Some(s) => match SampleSpace::from_str(&s) {
            Some(space) => space,
            None => {
                return Some(error_response(
                    msg_id,
                    &format!("invalid :space (use absolute, normalized): {s}"),
                ))
            }
        },
        None => SampleSpace::Absolute,
    };

    let sample = PointSample::new(x, y, timestamp);
    let events = state
        .controller
        .on_point_sample(stream, sample, space, now, &mut state.effects);
    state.queue_events(events);
    Some(ok_response(msg_id))
}

fn handle_gaze_lost(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let stream = get_int(value, "stream").unwrap_or(0).max(0) as u64;
    let events = state.controller.end_stream(stream);
    state.queue_events(events);
    Some(ok_response(msg_id))
}

fn handle_activate(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let index = match get_int(value, "index") {
        Some(i) if i >= 0 => i as usize,
        _ => return Some(error_response(msg_id, "missing or invalid :index")),
    };
    let duration = get_float(value, "duration-ms");
    let now = state.clock.now_ms();
    let result = state
        .controller
        .activate(index, duration, now, &mut state.effects);
    respond(state, msg_id, result)
}

fn handle_switch_next(state: &mut AacState, msg_id: i64) -> Option<String> {
    let result = state.controller.switch_next();
    respond(state, msg_id, result)
}

fn handle_switch_select(state: &mut AacState, msg_id: i64) -> Option<String> {
    let now = state.clock.now_ms();
    let result = state.controller.switch_select(now, &mut state.effects);
    respond(state, msg_id, result)
}

fn handle_expression(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let mut vector = ExpressionVector::new();
    for (key, val) in entries(value) {
        if ENVELOPE_KEYS.contains(&key.as_str()) {
            continue;
        }
        let v = value_text(val).parse::<f64>().unwrap_or(f64::NAN);
        vector.record(&key, v);
    }
    let events = state.controller.on_expression(&vector);
    state.queue_events(events);
    let label = state.controller.affect();
    Some(format!(
        "(:type :response :id {} :status :ok :label :{})",
        msg_id,
        label.kind.as_str()
    ))
}

fn handle_expression_unavailable(state: &mut AacState, msg_id: i64) -> Option<String> {
    let events = state.controller.on_expression_unavailable();
    state.queue_events(events);
    Some(ok_response(msg_id))
}

fn handle_board_set(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let Some(labels) = get_value(value, "labels").and_then(list_texts) else {
        return Some(error_response(msg_id, "missing or invalid :labels list"));
    };
    let events = state.controller.set_board(labels);
    state.config.board = state.controller.board().labels().to_vec();
    state.queue_events(events);
    Some(format!(
        "(:type :response :id {} :status :ok :count {})",
        msg_id,
        state.controller.board().snapshot().len()
    ))
}

fn handle_grid_set_geometry(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let fields = ["left", "top", "width", "height"].map(|k| get_float(value, k));
    let [Some(left), Some(top), Some(width), Some(height)] = fields else {
        return Some(error_response(msg_id, "requires :left :top :width :height"));
    };
    let cols = match get_int(value, "cols") {
        Some(c) if (1..=64).contains(&c) => Some(c as usize),
        Some(_) => return Some(error_response(msg_id, "invalid :cols (1-64)")),
        None => None,
    };
    let result = state
        .controller
        .set_geometry(Rect::new(left, top, width, height), cols);
    if result.is_ok() {
        state.config.grid_columns = state.controller.board().cols();
    }
    respond(state, msg_id, result)
}

fn handle_board_status(state: &mut AacState, msg_id: i64) -> Option<String> {
    let grid = state.controller.board().snapshot().status_sexp();
    Some(format!(
        "(:type :response :id {} :status :ok :grid {})",
        msg_id, grid
    ))
}

fn handle_blocklist_add(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let Some(word) = get_string(value, "word") else {
        return Some(error_response(msg_id, "missing :word"));
    };
    let events = state.controller.block_word(&word);
    if !events.is_empty() {
        info!(word, "word blocked");
    }
    state.queue_events(events);
    handle_blocklist_list(state, msg_id)
}

fn handle_blocklist_remove(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let Some(word) = get_string(value, "word") else {
        return Some(error_response(msg_id, "missing :word"));
    };
    let events = state.controller.unblock_word(&word);
    if !events.is_empty() {
        info!(word, "word unblocked");
    }
    state.queue_events(events);
    handle_blocklist_list(state, msg_id)
}

fn handle_blocklist_set(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let Some(words) = get_value(value, "words").and_then(list_texts) else {
        return Some(error_response(msg_id, "missing or invalid :words list"));
    };
    let events = state.controller.set_blocklist(&words);
    state.queue_events(events);
    handle_blocklist_list(state, msg_id)
}

fn handle_blocklist_list(state: &mut AacState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :words {})",
        msg_id,
        state.controller.blocklist_sexp()
    ))
}

fn handle_phrase_status(state: &mut AacState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :phrase {})",
        msg_id,
        state.controller.phrase_sexp()
    ))
}

fn handle_phrase_clear(state: &mut AacState, msg_id: i64) -> Option<String> {
    let events = state.controller.clear_phrase();
    state.queue_events(events);
    Some(ok_response(msg_id))
}

fn handle_phrase_undo(state: &mut AacState, msg_id: i64) -> Option<String> {
    let now = state.clock.now_ms();
    let result = state.controller.undo(now);
    respond(state, msg_id, result)
}

fn handle_method_status(state: &mut AacState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :methods {})",
        msg_id,
        state.controller.tracker().status_sexp()
    ))
}

fn handle_method_reset(state: &mut AacState, msg_id: i64) -> Option<String> {
    let events = state.controller.reset_methods();
    state.queue_events(events);
    Some(ok_response(msg_id))
}

fn handle_affect_status(state: &mut AacState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :affect {})",
        msg_id,
        state.controller.affect_sexp()
    ))
}

fn handle_config(state: &mut AacState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :config {})",
        msg_id,
        state.config.to_sexp()
    ))
}

fn handle_config_set(state: &mut AacState, msg_id: i64, value: &Value) -> Option<String> {
    let mut config = state.config.clone();
    let mut changed = Vec::new();
    for (key, val) in entries(value) {
        if ENVELOPE_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Err(e) = config.apply(&key, val) {
            return Some(error_response(msg_id, &format!("{e:#}")));
        }
        changed.push(key);
    }
    if changed.is_empty() {
        return Some(error_response(msg_id, "no configuration keys given"));
    }
    info!(keys = ?changed, "configuration updated");
    state.apply_config(config);
    handle_config(state, msg_id)
}

// ── IPC security handlers ────────────────────────────────

fn handle_ipc_client_info(
    state: &mut AacState,
    client_id: u64,
    msg_id: i64,
) -> Option<String> {
    if let Some(client) = state.ipc_server.clients.get(&client_id) {
        let uid = client.peer_uid.map(|u| u.to_string()).unwrap_or_else(|| "nil".to_string());
        let pid = client.peer_pid.map(|p| p.to_string()).unwrap_or_else(|| "nil".to_string());
        let name = client
            .name
            .as_deref()
            .map(|n| format!("\"{}\"", escape_string(n)))
            .unwrap_or_else(|| "nil".to_string());
        let rate = client.rate_limiter.max_per_second;
        Some(format!(
            "(:type :response :id {} :status :ok :client-id {} :name {} :peer-uid {} :peer-pid {} :authenticated t :rate-limit {})",
            msg_id, client_id, name, uid, pid, rate
        ))
    } else {
        Some(error_response(msg_id, "client not found"))
    }
}

fn handle_ipc_rate_limit(
    state: &mut AacState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let new_limit = match get_int(value, "limit") {
        Some(n) if n > 0 && n <= 10000 => n as u32,
        Some(_) => return Some(error_response(msg_id, "limit must be 1-10000")),
        None => return Some(error_response(msg_id, "missing :limit parameter")),
    };

    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
        client.rate_limiter.max_per_second = new_limit;
        debug!(client_id, new_limit, "rate limit updated");
    }
    Some(ok_response(msg_id))
}

// ── Helpers ────────────────────────────────────────────────

/// Queue the events of an accepted request, or report why it was rejected.
fn respond(
    state: &mut AacState,
    msg_id: i64,
    result: Result<Vec<ControllerEvent>, Rejection>,
) -> Option<String> {
    match result {
        Ok(events) => {
            state.queue_events(events);
            Some(ok_response(msg_id))
        }
        Err(rejection) => Some(error_response(msg_id, &rejection.to_string())),
    }
}

fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AacConfig;
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;

    /// State with one connected (unauthenticated) client.
    fn make_state() -> (AacState, u64, UnixStream) {
        let config = AacConfig {
            viewport_width: 400.0,
            viewport_height: 300.0,
            ..AacConfig::default()
        };
        let mut state = AacState::new(config, PathBuf::from("/tmp/aacd-dispatch-test.sock"));
        let (ours, theirs) = UnixStream::pair().unwrap();
        let id = state.ipc_server.accept(ours);
        (state, id, theirs)
    }

    fn authed_state() -> (AacState, u64, UnixStream) {
        let (mut state, id, peer) = make_state();
        let r = handle_message(&mut state, id, "(:type :hello :version 1 :client \"test\")").unwrap();
        assert!(r.starts_with("(:type :hello"));
        (state, id, peer)
    }

    fn send(state: &mut AacState, id: u64, msg: &str) -> Value {
        let r = handle_message(state, id, msg).expect("response");
        lexpr::from_str(&r).expect("valid response s-expression")
    }

    fn status_of(v: &Value) -> String {
        get_keyword(v, "status").unwrap_or_default()
    }

    // ── ok_response / error_response ────────────────────────

    #[test]
    fn test_ok_response_parseable_fields() {
        let v = lexpr::from_str(&ok_response(99)).unwrap();
        assert_eq!(get_keyword(&v, "type"), Some("response".to_string()));
        assert_eq!(get_int(&v, "id"), Some(99));
        assert_eq!(status_of(&v), "ok");
    }

    #[test]
    fn test_error_response_escapes_quotes() {
        let r = error_response(5, "say \"hello\"");
        assert!(r.contains("say \\\"hello\\\""));
        let v = lexpr::from_str(&r).unwrap();
        assert_eq!(status_of(&v), "error");
        assert_eq!(get_keyword(&v, "reason"), Some("say \"hello\"".to_string()));
    }

    // ── Envelope handling ───────────────────────────────────

    #[test]
    fn test_malformed_message() {
        let (mut state, id, _peer) = make_state();
        let v = send(&mut state, id, "(:type :hello");
        assert_eq!(status_of(&v), "error");
    }

    #[test]
    fn test_hello_required_first() {
        let (mut state, id, _peer) = make_state();
        let v = send(&mut state, id, "(:type :ping :id 3)");
        assert_eq!(get_keyword(&v, "reason"), Some("hello handshake required".to_string()));
        assert_eq!(get_int(&v, "id"), Some(3));
    }

    #[test]
    fn test_hello_version_mismatch() {
        let (mut state, id, _peer) = make_state();
        let v = send(&mut state, id, "(:type :hello :version 2)");
        assert_eq!(status_of(&v), "error");
        assert!(!state.ipc_server.clients[&id].authenticated);
    }

    #[test]
    fn test_unknown_and_missing_type() {
        let (mut state, id, _peer) = authed_state();
        let v = send(&mut state, id, "(:type :teleport)");
        assert_eq!(get_keyword(&v, "reason"), Some("unknown message type: teleport".to_string()));
        let v = send(&mut state, id, "(:id 1)");
        assert_eq!(get_keyword(&v, "reason"), Some("missing :type field".to_string()));
    }

    #[test]
    fn test_client_info_reports_name() {
        let (mut state, id, _peer) = authed_state();
        let v = send(&mut state, id, "(:type :ipc-client-info)");
        assert_eq!(get_string(&v, "name"), Some("test".to_string()));
        let v = send(&mut state, id, "(:type :ipc-rate-limit :limit 0)");
        assert_eq!(status_of(&v), "error");
    }

    // ── Input flow ──────────────────────────────────────────

    #[test]
    fn test_gaze_dwell_selection_flow() {
        let (mut state, id, _peer) = authed_state();
        let v = send(&mut state, id, "(:type :mode-set :mode :eye)");
        assert_eq!(get_keyword(&v, "mode"), Some("eye".to_string()));
        state.take_pending_events();

        // Cell 3 ("more") centre on the 400x300 grid.
        for t in (0..=1300).step_by(100) {
            let msg = format!("(:type :gaze-sample :x 350 :y 50 :timestamp {t})");
            assert_eq!(status_of(&send(&mut state, id, &msg)), "ok");
        }
        let events = state.take_pending_events();
        assert!(events.iter().any(|e| e.contains(":selection :method :eye :index 3 :label \"more\"")));
        assert!(events.iter().any(|e| e.contains(":speak :text \"more\"")));
        assert!(events.iter().any(|e| e.contains(":telemetry :method :eye")));

        let v = send(&mut state, id, "(:type :phrase-status)");
        let phrase = get_value(&v, "phrase").unwrap();
        assert_eq!(get_string(phrase, "text"), Some("more".to_string()));
    }

    #[test]
    fn test_normalized_sample_and_bad_space() {
        let (mut state, id, _peer) = authed_state();
        send(&mut state, id, "(:type :mode-set :mode :eye)");
        send(&mut state, id, "(:type :gaze-sample :x 0.1 :y 0.1 :timestamp 0 :space :normalized)");
        assert_eq!(state.controller.hover(), Some(0));
        let v = send(&mut state, id, "(:type :gaze-sample :x 1 :y 1 :space :polar)");
        assert_eq!(status_of(&v), "error");
        let v = send(&mut state, id, "(:type :gaze-sample :y 1)");
        assert_eq!(status_of(&v), "error");
    }

    #[test]
    fn test_gaze_lost_clears_hover() {
        let (mut state, id, _peer) = authed_state();
        send(&mut state, id, "(:type :mode-set :mode :eye)");
        send(&mut state, id, "(:type :gaze-sample :x 10 :y 10 :timestamp 0 :stream 2)");
        assert_eq!(state.controller.hover(), Some(0));
        send(&mut state, id, "(:type :gaze-lost :stream 2)");
        assert_eq!(state.controller.hover(), None);
    }

    #[test]
    fn test_activate_and_undo() {
        let (mut state, id, _peer) = authed_state();
        assert_eq!(status_of(&send(&mut state, id, "(:type :activate :index 1)")), "ok");
        let v = send(&mut state, id, "(:type :activate :index 40)");
        assert_eq!(get_keyword(&v, "reason"), Some("no enabled target at index 40".to_string()));
        let v = send(&mut state, id, "(:type :activate)");
        assert_eq!(status_of(&v), "error");

        assert_eq!(status_of(&send(&mut state, id, "(:type :phrase-undo)")), "ok");
        // Undone right after selection: counted as an error.
        assert_eq!(state.controller.tracker().stats(InputMethod::Touch).error_count, 1);
        let v = send(&mut state, id, "(:type :phrase-undo)");
        assert_eq!(get_keyword(&v, "reason"), Some("phrase is empty".to_string()));
    }

    #[test]
    fn test_switch_messages_require_switch_mode() {
        let (mut state, id, _peer) = authed_state();
        let v = send(&mut state, id, "(:type :switch-next)");
        assert_eq!(status_of(&v), "error");

        send(&mut state, id, "(:type :mode-set :mode :switches)");
        send(&mut state, id, "(:type :switch-next)");
        let v = send(&mut state, id, "(:type :switch-select)");
        assert_eq!(status_of(&v), "ok");
        assert_eq!(state.controller.phrase_text(), "I");

        let v = send(&mut state, id, "(:type :mode-set :mode :mouse)");
        assert_eq!(status_of(&v), "error");
    }

    #[test]
    fn test_expression_classification() {
        let (mut state, id, _peer) = authed_state();
        let v = send(
            &mut state,
            id,
            "(:type :expression :mouthSmileLeft 0.9 :mouthSmileRight 0.8 :jawOpen 0.2)",
        );
        assert_eq!(get_keyword(&v, "label"), Some("happiness".to_string()));
        let events = state.take_pending_events();
        assert!(events.iter().any(|e| e.contains(":affect :label :happiness")));
        assert!(events.iter().any(|e| e.contains(":adaptation :layout :normal")));

        let v = send(&mut state, id, "(:type :expression :jawOpen 0.2 :cheekPuff 0.1)");
        assert_eq!(get_keyword(&v, "label"), Some("neutral".to_string()));

        let v = send(&mut state, id, "(:type :expression)");
        assert_eq!(get_keyword(&v, "label"), Some("unknown".to_string()));

        send(&mut state, id, "(:type :expression-unavailable)");
        let v = send(&mut state, id, "(:type :affect-status)");
        let affect = get_value(&v, "affect").unwrap();
        assert_eq!(get_keyword(affect, "available"), Some("nil".to_string()));
    }

    // ── Board ───────────────────────────────────────────────

    #[test]
    fn test_blocklist_and_board() {
        let (mut state, id, _peer) = authed_state();
        let v = send(&mut state, id, "(:type :blocklist-add :word \"Toilet\")");
        let words = get_value(&v, "words").and_then(list_texts).unwrap();
        assert_eq!(words, vec!["toilet".to_string()]);
        assert_eq!(state.controller.board().snapshot().len(), 11);
        assert!(state
            .take_pending_events()
            .iter()
            .any(|e| e.contains(":grid-rebuilt")));

        send(&mut state, id, "(:type :blocklist-set :words (\"yes\" \"no\"))");
        assert_eq!(state.controller.board().snapshot().len(), 10);
        send(&mut state, id, "(:type :blocklist-remove :word \"no\")");
        assert_eq!(state.controller.board().snapshot().len(), 11);

        let v = send(&mut state, id, "(:type :board-set :labels (\"hello\" \"yes\" \"bye\"))");
        assert_eq!(get_int(&v, "count"), Some(2));
        assert_eq!(state.config.board.len(), 3);

        let v = send(&mut state, id, "(:type :board-status)");
        let grid = get_value(&v, "grid").unwrap();
        assert_eq!(get_int(grid, "count"), Some(2));
    }

    #[test]
    fn test_grid_geometry() {
        let (mut state, id, _peer) = authed_state();
        let v = send(
            &mut state,
            id,
            "(:type :grid-set-geometry :left 0 :top 100 :width 600 :height 300 :cols 6)",
        );
        assert_eq!(status_of(&v), "ok");
        assert_eq!(state.controller.board().snapshot().rows, 2);
        assert_eq!(state.config.grid_columns, 6);

        let v = send(&mut state, id, "(:type :grid-set-geometry :left 0 :top 0 :width 0 :height 10)");
        assert_eq!(status_of(&v), "error");
        let v = send(&mut state, id, "(:type :grid-set-geometry :left 0)");
        assert_eq!(status_of(&v), "error");
    }

    // ── Config ──────────────────────────────────────────────

    #[test]
    fn test_config_set() {
        let (mut state, id, _peer) = authed_state();
        let v = send(&mut state, id, "(:type :config-set :dwell-threshold-ms 1500 :smile-threshold 0.7)");
        assert_eq!(status_of(&v), "ok");
        assert_eq!(state.config.dwell.threshold_ms, 1500.0);
        assert_eq!(state.controller.dwell().config.threshold_ms, 1500.0);
        let config = get_value(&v, "config").unwrap();
        assert_eq!(get_float(config, "smile-threshold"), Some(0.7));

        let v = send(&mut state, id, "(:type :config-set :smile-threshold 3)");
        assert_eq!(status_of(&v), "error");
        assert_eq!(state.config.affect.smile, 0.7);

        let v = send(&mut state, id, "(:type :config-set)");
        assert_eq!(status_of(&v), "error");
    }

    #[test]
    fn test_method_status_and_reset() {
        let (mut state, id, _peer) = authed_state();
        send(&mut state, id, "(:type :activate :index 0 :duration-ms 500)");
        let v = send(&mut state, id, "(:type :method-status)");
        let methods = get_value(&v, "methods").unwrap();
        assert_eq!(get_keyword(methods, "best"), Some("touch".to_string()));
        assert_eq!(status_of(&send(&mut state, id, "(:type :method-reset)")), "ok");
        assert_eq!(state.controller.tracker().stats(InputMethod::Touch).sample_count, 0);
    }
}
