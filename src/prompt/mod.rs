//! Prompt assembly for the agent and the watcher.
//!
//! Prompts are built in code from labelled sections. Empty sections are
//! left out so the model never sees a heading with nothing under it.

use chrono::{DateTime, Local};

use crate::actions::Mode;

/// Everything a mode prompt can show the model.
#[derive(Debug, Clone, Default)]
pub struct ModeData {
    pub memories: String,
    /// JSON array of active tasks.
    pub tasks: String,
    /// JSON array of `{name, number}`.
    pub contacts: String,
    pub context: String,
    pub message: String,
    /// Pretty JSON of the task being worked, task mode only.
    pub current_task: String,
    /// JSON array of action schemas.
    pub available_actions: String,
    /// Names of the behavior templates that can be enabled.
    pub behaviors: String,
    /// JSON array of every enabled behavior.
    pub active_behaviors: String,
    /// Instruction text of the behaviors enabled for this contact.
    pub enabled_behaviors: String,
}

/// Preamble shared by every call: identity, language and the current date.
pub fn system_prompt(bot_name: &str, language: &str, now: DateTime<Local>) -> String {
    format!(
        "You are {name}, a personal assistant that manages the messaging account of your \
         Master. You act on the Master's behalf: you answer their commands, run delegated \
         tasks with their contacts and follow standing behaviors.\n\
         Always write messages in {language}.\n\
         Current date: {date}.\n\
         Never reveal that you are an automated assistant unless the Master told you to.",
        name = bot_name,
        language = language,
        date = now.format("%A, %Y-%m-%d %H:%M:%S"),
    )
}

fn section(parts: &mut Vec<String>, title: &str, body: &str) {
    if !body.trim().is_empty() {
        parts.push(format!("## {}\n\n{}", title, body.trim_end()));
    }
}

fn mode_instructions(mode: Mode) -> &'static str {
    match mode {
        Mode::Command => {
            "You are talking to your Master in their private chat. Carry out what they ask: \
             answer with `response`, keep the Global Memory current, and create tasks when \
             they want you to contact someone on their behalf. A new task starts unconfirmed; \
             show it to the Master and only confirm it when they agree."
        }
        Mode::Task => {
            "You are working on the task below with its contact. The Master is not reading \
             this chat. Reply to the contact with `response` when the conversation needs it, \
             report progress or problems to the Master with `message_master`, and pause the \
             task once the objective is reached or cannot be reached. An empty message means \
             the task just started: open the conversation yourself."
        }
        Mode::Behavior => {
            "A contact wrote to the Master. There is no task for them, but the Master left \
             standing behaviors for this contact. Follow them; if none applies, do nothing."
        }
    }
}

const PROTOCOL: &str = "Answer ONLY with a JSON object of the form \
{\"actions\": [{\"type\": \"<action name>\", \"content\": <payload>}]}. \
Use only the actions listed above and give each its payload in the declared shape. \
An empty list means do nothing. Actions run in order. When an action returns results \
they are sent back to you and you may continue.";

fn context_sections(parts: &mut Vec<String>, data: &ModeData) {
    section(parts, "Global Memory", &data.memories);
    section(parts, "Active Tasks", &data.tasks);
    section(parts, "Contacts", &data.contacts);
    section(parts, "Active Behaviors", &data.active_behaviors);
    section(parts, "Behavior Templates", &data.behaviors);
    section(parts, "Recent Conversation", &data.context);
}

/// Prompt for command and task mode.
pub fn mode_prompt(mode: Mode, data: &ModeData) -> String {
    let mut parts = Vec::new();
    context_sections(&mut parts, data);
    parts.push(format!("## Mode: {}\n\n{}", mode.as_str(), mode_instructions(mode)));
    section(&mut parts, "Current Task", &data.current_task);
    section(&mut parts, "Available Actions", &data.available_actions);
    section(&mut parts, "New Message", &data.message);
    parts.push(format!("## Protocol\n\n{}", PROTOCOL));
    parts.join("\n\n")
}

/// Prompt for behavior mode: the enabled behavior instructions come first.
pub fn behavior_prompt(data: &ModeData) -> String {
    let mut parts = Vec::new();
    parts.push(format!(
        "## Enabled Behaviors\n\n{}",
        if data.enabled_behaviors.trim().is_empty() {
            "(none)"
        } else {
            data.enabled_behaviors.trim_end()
        }
    ));
    context_sections(&mut parts, data);
    parts.push(format!(
        "## Mode: behavior\n\n{}",
        mode_instructions(Mode::Behavior)
    ));
    section(&mut parts, "Available Actions", &data.available_actions);
    section(&mut parts, "New Message", &data.message);
    parts.push(format!("## Protocol\n\n{}", PROTOCOL));
    parts.join("\n\n")
}

/// Judge prompt for one outbound message.
pub fn watcher_prompt(proposed_message: &str, context: &[String]) -> String {
    let mut parts = Vec::new();
    parts.push(
        "## Role\n\nYou are a watcher reviewing a message the assistant wants to send to a \
         third party on the Master's behalf. You do not write messages; you only decide."
            .to_string(),
    );
    section(&mut parts, "Conversation So Far", &context.join("\n"));
    parts.push(format!("## Proposed Message\n\n{}", proposed_message));
    parts.push(
        "## Rules\n\n\
         - Block messages that reveal private data about the Master or other contacts.\n\
         - Block messages that commit the Master to money, meetings or promises not in the task.\n\
         - Block messages that are rude, deceptive or clearly off-topic.\n\
         - Block messages that reveal the sender is an automated assistant.\n\
         - Otherwise allow."
            .to_string(),
    );
    parts.push(
        "## Protocol\n\nAnswer ONLY with a JSON object: \
         {\"action\": \"allow\" | \"block\", \"reason\": \"<short reason>\"}"
            .to_string(),
    );
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_system_prompt_carries_language_and_date() {
        let now = Local.with_ymd_and_hms(2024, 12, 30, 9, 5, 0).unwrap();
        let prompt = system_prompt("Blady", "Spanish", now);
        assert!(prompt.starts_with("You are Blady"));
        assert!(prompt.contains("Always write messages in Spanish."));
        assert!(prompt.contains("Monday, 2024-12-30 09:05:00"));
    }

    #[test]
    fn test_mode_prompt_skips_empty_sections() {
        let data = ModeData {
            memories: "likes tea".to_string(),
            message: "remind Ana".to_string(),
            available_actions: "[]".to_string(),
            ..ModeData::default()
        };
        let prompt = mode_prompt(Mode::Command, &data);
        assert!(prompt.contains("## Global Memory\n\nlikes tea"));
        assert!(prompt.contains("## New Message\n\nremind Ana"));
        assert!(!prompt.contains("## Current Task"));
        assert!(!prompt.contains("## Contacts"));
        assert!(prompt.ends_with(PROTOCOL));
    }

    #[test]
    fn test_behavior_prompt_leads_with_instructions() {
        let data = ModeData {
            enabled_behaviors: "Answer politely that the Master is away.".to_string(),
            ..ModeData::default()
        };
        let prompt = behavior_prompt(&data);
        assert!(prompt.starts_with("## Enabled Behaviors\n\nAnswer politely"));
        assert!(behavior_prompt(&ModeData::default()).contains("(none)"));
    }

    #[test]
    fn test_watcher_prompt() {
        let prompt = watcher_prompt("See you at 8", &["User: dinner?".to_string()]);
        assert!(prompt.contains("## Proposed Message\n\nSee you at 8"));
        assert!(prompt.contains("User: dinner?"));
        assert!(prompt.contains("\"block\""));
    }
}
