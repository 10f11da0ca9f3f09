use crate::error::Result;
use crate::registry::{CommandRegistry, RegistryBuilder};
use std::sync::Arc;

pub mod command;
pub mod filter;
pub mod help;
pub mod limits;
pub mod megalog;
pub mod ping;
pub mod prefix;
pub mod rank;
pub mod setup;

/// Registry with every built-in command.
pub fn builtin() -> Result<CommandRegistry> {
    RegistryBuilder::new()
        .register(Arc::new(ping::Ping))
        .register(Arc::new(help::Help))
        .register(Arc::new(prefix::Prefix))
        .register(Arc::new(rank::RankCommand::admins()))
        .register(Arc::new(rank::RankCommand::mods()))
        .register(Arc::new(rank::RankCommand::immune()))
        .register(Arc::new(command::Toggle))
        .register(Arc::new(limits::Limits))
        .register(Arc::new(megalog::Megalog))
        .register(Arc::new(filter::FilterCommand))
        .register(Arc::new(setup::Setup))
        .build()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::clock::MockClock;
    use crate::dispatch::{handle_message, Dispatch, IncomingMessage};
    use crate::testing::{test_data, RecordingSink};
    use crate::Data;

    pub const GUILD: u64 = 1;
    pub const CHANNEL: u64 = 10;
    pub const ADMIN: u64 = 20;
    pub const MEMBER: u64 = 21;

    pub struct Bot {
        pub data: Data,
        pub sink: RecordingSink,
        pub clock: MockClock,
    }

    impl Bot {
        pub fn new() -> Self {
            let clock = MockClock::default();
            Self {
                data: test_data(&clock, super::builtin().unwrap()),
                sink: RecordingSink::new(),
                clock,
            }
        }

        /// Sends `content` as a guild administrator.
        pub async fn admin(&self, content: &str) -> Dispatch {
            let mut message = IncomingMessage::test(GUILD, CHANNEL, ADMIN);
            message.content = content.to_string();
            message.author_is_admin = true;
            handle_message(&self.data, &self.sink, &message).await
        }

        pub async fn member(&self, content: &str) -> Dispatch {
            let mut message = IncomingMessage::test(GUILD, CHANNEL, MEMBER);
            message.content = content.to_string();
            handle_message(&self.data, &self.sink, &message).await
        }

        pub fn reply(&self) -> String {
            self.sink.last_text().unwrap_or_default()
        }
    }
}
