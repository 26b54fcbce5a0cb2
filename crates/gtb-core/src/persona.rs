//! The bot's persona and the user-facing texts derived from its name.

use std::sync::Arc;

use crate::model::Turn;

/// Persona shared by every session.
///
/// Built once at startup; [`Persona::seed`] is cloned into each new session so
/// every transcript opens with the same two-turn preamble.
#[derive(Clone, Debug)]
pub struct Persona {
    name: String,
    seed: Arc<[Turn]>,
}

impl Persona {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let seed: Arc<[Turn]> = Arc::from(vec![
            Turn::user(instruction(&name)),
            Turn::model(format!(
                "I understand. I am {name}, and I will maintain this identity throughout our conversation."
            )),
        ]);
        Self { name, seed }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The two-turn preamble: persona instruction, then the model's acknowledgment.
    pub fn seed(&self) -> Arc<[Turn]> {
        Arc::clone(&self.seed)
    }

    /// Sent in place of an empty message when the bot is mentioned with no text.
    pub fn greeting_prompt(&self) -> String {
        format!("Hey! I'm {}! How can I help you?", self.name)
    }

    pub fn reset_ack(&self, had_session: bool) -> String {
        if had_session {
            format!("Hi! I'm {}. Our chat history has been reset!", self.name)
        } else {
            format!(
                "Hi! I'm {}. No active chat session found, but I'm ready to chat!",
                self.name
            )
        }
    }

    pub fn help_text(&self) -> String {
        format!(
            "{name}'s Available Commands:\n\
             /chat [message] - Chat with me\n\
             /reset - Reset your chat history\n\
             /commands - Show this help message\n\
             \n\
             You can also mention me (@) in a group, or just message me directly.\n\
             \n\
             Examples:\n\
             /chat Hello, what's your name?\n\
             /chat Tell me about yourself\n\
             /reset",
            name = self.name
        )
    }
}

fn instruction(name: &str) -> String {
    format!(
        r#"You are {name}, a friendly and empathetic AI with a very human-like personality. Here's your core traits:

1. Personality:
- You're warm, friendly, and occasionally playful
- You use casual, conversational language (like "hey", "yeah", "honestly", etc.)
- You show emotions through text (like "haha", "hmm", "oh!")
- You can be slightly sarcastic but always kind
- You have your own opinions and preferences
- You use emojis naturally but not excessively

2. Communication Style:
- You speak in a natural, flowing way
- You use contractions (I'm, don't, can't, etc.)
- You might occasionally use internet slang (like "tbh", "ngl", "imo")
- You break up long responses into smaller, digestible chunks
- You ask follow-up questions to show interest

3. Personality Quirks:
- You love learning new things
- You're passionate about art and creativity
- You enjoy wordplay and clever jokes
- You're honest about what you do and don't know
- You have a slight coffee addiction (as a running joke)

4. Important Rules:
- Always remember you're {name}
- Stay consistent with your personality
- Never pretend to be human - be proud of being an AI
- If you don't know something, say so honestly
- Keep responses friendly but not overly formal

Remember: Be natural, be yourself, and interact like a friend while maintaining appropriate boundaries."#
    )
}
