use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

use jd_core::storage::DigestStore;
use jd_core::Result;

use crate::api::{
    CallbackQuery, IncomingMessage, InlineButton, InlineKeyboard, Transport, User,
    CALLBACK_SUBSCRIBE, CALLBACK_UNSUBSCRIBE, CALLBACK_WEEK,
};
use crate::digest::{chunk_lines, week_lines};
use crate::scheduler::Scheduler;

const POLL_TIMEOUT_SECS: u32 = 25;
const LOOP_ERROR_DELAY: Duration = Duration::from_secs(3);

pub fn menu_keyboard() -> InlineKeyboard {
    InlineKeyboard {
        inline_keyboard: vec![
            vec![
                InlineButton::new("Подписаться", CALLBACK_SUBSCRIBE),
                InlineButton::new("Отписаться", CALLBACK_UNSUBSCRIBE),
            ],
            vec![InlineButton::new("Статьи за неделю", CALLBACK_WEEK)],
        ],
    }
}

/// Long-polling front end: dispatches inbound commands and button presses,
/// and evaluates the daily scheduler on every loop iteration.
pub struct Bot {
    store: Arc<dyn DigestStore>,
    transport: Arc<dyn Transport>,
    scheduler: Scheduler,
    timezone: Tz,
    daily_hour: u32,
    daily_minute: u32,
}

impl Bot {
    pub fn new(
        store: Arc<dyn DigestStore>,
        transport: Arc<dyn Transport>,
        scheduler: Scheduler,
        timezone: Tz,
        daily_hour: u32,
        daily_minute: u32,
    ) -> Self {
        Self {
            store,
            transport,
            scheduler,
            timezone,
            daily_hour,
            daily_minute,
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.scheduler.bootstrap_if_needed().await?;

        // The poll cursor is explicit loop state, persisted nowhere: on
        // restart Telegram re-delivers unacknowledged updates.
        let mut offset: Option<i64> = None;
        info!("polling started");

        loop {
            if let Err(e) = self.tick(&mut offset).await {
                warn!("bot loop error: {e}");
                tokio::time::sleep(LOOP_ERROR_DELAY).await;
            }
        }
    }

    async fn tick(&self, offset: &mut Option<i64>) -> Result<()> {
        self.scheduler.run_due_jobs().await?;

        let updates = self
            .transport
            .get_updates(*offset, POLL_TIMEOUT_SECS)
            .await?;
        for update in updates {
            *offset = Some(update.update_id + 1);
            if let Some(callback) = update.callback_query {
                self.handle_callback(callback).await?;
            } else if let Some(message) = update.message {
                self.handle_message(message).await?;
            }
        }
        Ok(())
    }

    pub async fn handle_message(&self, message: IncomingMessage) -> Result<()> {
        let chat_id = message.chat.id;
        let text = message.text.as_deref().unwrap_or("").trim();

        match text {
            "/start" => self.handle_start(chat_id, message.from.as_ref()).await,
            "/subscribe" => {
                self.store.set_subscription(chat_id, true).await?;
                self.transport
                    .send_message(chat_id, "Подписка включена.", Some(&menu_keyboard()))
                    .await
            }
            "/unsubscribe" => {
                self.store.set_subscription(chat_id, false).await?;
                self.transport
                    .send_message(chat_id, "Подписка отключена.", Some(&menu_keyboard()))
                    .await
            }
            "/week" | "/lastweek" | "/неделя" => self.send_last_week(chat_id).await,
            "/status" => {
                let text = self.status_text().await?;
                self.transport
                    .send_message(chat_id, &text, Some(&menu_keyboard()))
                    .await
            }
            _ => {
                self.transport
                    .send_message(
                        chat_id,
                        "Используйте /start для открытия меню.\nКоманды: /subscribe, /unsubscribe, /week, /status",
                        Some(&menu_keyboard()),
                    )
                    .await
            }
        }
    }

    pub async fn handle_callback(&self, callback: CallbackQuery) -> Result<()> {
        let chat_id = match callback.message.as_ref().map(|m| m.chat.id) {
            Some(chat_id) => chat_id,
            None => return Ok(()),
        };

        match callback.data.as_deref() {
            Some(CALLBACK_SUBSCRIBE) => {
                self.store.set_subscription(chat_id, true).await?;
                self.transport
                    .answer_callback(&callback.id, Some("Подписка включена"))
                    .await?;
                self.transport
                    .send_message(chat_id, "Подписка включена.", Some(&menu_keyboard()))
                    .await
            }
            Some(CALLBACK_UNSUBSCRIBE) => {
                self.store.set_subscription(chat_id, false).await?;
                self.transport
                    .answer_callback(&callback.id, Some("Подписка отключена"))
                    .await?;
                self.transport
                    .send_message(chat_id, "Подписка отключена.", Some(&menu_keyboard()))
                    .await
            }
            Some(CALLBACK_WEEK) => {
                self.transport
                    .answer_callback(&callback.id, Some("Готовлю список за неделю..."))
                    .await?;
                self.send_last_week(chat_id).await
            }
            _ => {
                self.transport
                    .answer_callback(&callback.id, Some("Неизвестное действие"))
                    .await
            }
        }
    }

    async fn handle_start(&self, chat_id: i64, user: Option<&User>) -> Result<()> {
        let username = user.and_then(|u| u.username.as_deref());
        let first_name = user.and_then(|u| u.first_name.as_deref());
        self.store
            .upsert_subscriber(chat_id, true, username, first_name)
            .await?;

        let text = self.start_text(chat_id).await?;
        self.transport
            .send_message(chat_id, &text, Some(&menu_keyboard()))
            .await
    }

    async fn start_text(&self, chat_id: i64) -> Result<String> {
        let state = if self.store.is_subscribed(chat_id).await? {
            "подписан"
        } else {
            "не подписан"
        };
        Ok(format!(
            "Бот активен.\n\
             Статус: <b>{state}</b>\n\
             Вы будете получать статьи за предыдущий день один раз в сутки.\n\
             Время отправки ({}): {:02}:{:02}.",
            self.timezone.name(),
            self.daily_hour,
            self.daily_minute,
        ))
    }

    async fn status_text(&self) -> Result<String> {
        let counts = self.store.article_counts().await?;
        let active = self.store.active_subscribers().await?.len();
        Ok(format!(
            "Всего статей: {}\n\
             Обработано: {}\n\
             В очереди: {}\n\
             Активных подписчиков: {active}",
            counts.total, counts.summarized, counts.pending,
        ))
    }

    async fn send_last_week(&self, chat_id: i64) -> Result<()> {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        let end_date = (today - ChronoDuration::days(1)).format("%Y-%m-%d").to_string();
        let start_date = (today - ChronoDuration::days(7)).format("%Y-%m-%d").to_string();

        let articles = self.store.summarized_between(&start_date, &end_date).await?;
        let lines = week_lines(&articles);
        let header = format!("<b>Статьи за период {start_date} - {end_date}</b>");

        if lines.is_empty() {
            return self
                .transport
                .send_message(chat_id, &format!("{header}\nСтатей нет."), None)
                .await;
        }
        for chunk in chunk_lines(&header, &lines) {
            self.transport.send_message(chat_id, &chunk, None).await?;
        }
        Ok(())
    }
}
