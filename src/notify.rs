//! Messaging sink: bounded text messages, best-effort delivery.
//!
//! Delivery never blocks signal persistence. The engine wakes the
//! dispatcher after inserting a signal; the dispatcher drains every
//! unnotified row, sends each as one bounded text message, and flips
//! `notified` only after the sink confirms. A 30s fallback tick catches
//! signals whose wake was lost (full wake channel, restart).
//!
//! With no credentials configured the sink degrades to log-only delivery,
//! which keeps local runs and tests quiet but observable.

use crate::config::Config;
use crate::ingest::ActivitySnapshot;
use crate::store::Store;
use crate::types::SignalRecord;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

const SEND_DEADLINE: Duration = Duration::from_secs(10);
const SEND_ATTEMPTS: u32 = 3;

/// Hard cap for one outgoing message
const MAX_TEXT_LEN: usize = 900;

/// Telegram-style bot API sink.
#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    api_url: String,
    token: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(cfg: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: cfg.notifier_api_url.trim_end_matches('/').to_string(),
            token: cfg.notifier_token.clone(),
            chat_id: cfg.notifier_channel_id.clone(),
        }
    }

    /// Credentials present: real delivery. Otherwise log-only.
    pub fn enabled(&self) -> bool {
        !self.token.is_empty() && !self.chat_id.is_empty()
    }

    /// Send one bounded text message, retrying transient failures.
    pub async fn send_text(&self, text: &str) -> Result<(), String> {
        let text = truncate(text, MAX_TEXT_LEN);

        if !self.enabled() {
            log::info!("📨 (notifier disabled) {}", text);
            return Ok(());
        }

        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        let body = json!({ "chat_id": self.chat_id, "text": text });

        let mut last_err = String::new();
        for attempt in 0..SEND_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }

            match self
                .http
                .post(&url)
                .timeout(SEND_DEADLINE)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => last_err = format!("sink returned {}", resp.status()),
                Err(e) => last_err = e.to_string(),
            }
        }

        Err(last_err)
    }
}

/// Render one signal as its notification text.
pub fn format_signal(signal: &SignalRecord) -> String {
    format!(
        "🚨 BUY {} ({})\nreasons: {}\nvol spike {:.2}x | rsi {:.1} | ema {}\nts {}",
        signal.symbol,
        signal.mint,
        signal.reasons,
        signal.vol_spike,
        signal.rsi,
        if signal.ema_cross { "bull" } else { "flat" },
        signal.signal_ts,
    )
}

/// Render a periodic ingest activity snapshot.
pub fn format_activity(snapshot: &ActivitySnapshot) -> String {
    format!("📊 Ingest activity: {}", snapshot)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

/// Dispatcher task: deliver unnotified signals on wake or fallback tick.
pub async fn dispatch_task(store: Store, notifier: Notifier, mut wake_rx: mpsc::Receiver<()>) {
    log::info!(
        "📬 Notifier dispatcher running (delivery {})",
        if notifier.enabled() { "enabled" } else { "log-only" }
    );

    let mut fallback = tokio::time::interval(Duration::from_secs(30));
    fallback.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            wake = wake_rx.recv() => {
                if wake.is_none() {
                    log::info!("✅ Notifier dispatcher stopping (engine gone)");
                    return;
                }
            }
            _ = fallback.tick() => {}
        }

        let pending = match store.unnotified_signals() {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("⚠️  Could not read pending signals: {}", e);
                continue;
            }
        };

        for signal in pending {
            let text = format_signal(&signal);
            match notifier.send_text(&text).await {
                Ok(()) => {
                    if let Err(e) = store.mark_notified(signal.id) {
                        log::warn!("⚠️  Delivered but not marked (#{}): {}", signal.id, e);
                    }
                }
                Err(e) => {
                    // Leave the row unnotified; the next wake retries it
                    log::warn!("⚠️  Delivery failed for signal #{}: {}", signal.id, e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SignalRecord {
        SignalRecord {
            id: 7,
            mint: "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263".to_string(),
            symbol: "BONK".to_string(),
            signal_ts: 1_700_000_000,
            ema_cross: true,
            vol_spike: 3.41,
            rsi: 28.5,
            reasons: "vol_spike,unique_buyers".to_string(),
            notified: false,
        }
    }

    #[test]
    fn test_format_signal_contains_key_fields() {
        let text = format_signal(&record());
        assert!(text.contains("BONK"));
        assert!(text.contains("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263"));
        assert!(text.contains("vol_spike,unique_buyers"));
        assert!(text.contains("3.41"));
        assert!(text.len() <= MAX_TEXT_LEN);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ééééé";
        let cut = truncate(text, 3);
        assert!(cut.len() <= 3);
        assert!(std::str::from_utf8(cut.as_bytes()).is_ok());

        assert_eq!(truncate("short", 100), "short");
    }

    #[tokio::test]
    async fn test_disabled_notifier_accepts_everything() {
        let mut cfg = Config::from_env();
        cfg.notifier_token = String::new();
        cfg.notifier_channel_id = String::new();
        let notifier = Notifier::new(&cfg);

        assert!(!notifier.enabled());
        notifier.send_text("hello").await.unwrap();
    }
}
