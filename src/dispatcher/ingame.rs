//! Commands players issue in game (`/players`, `/give`, binds, ...).
//! Replies go back to the issuing player with `tell`.

use super::{lock, scan_levels, CommandDispatcher};
use crate::console::Origin;
use crate::utils::format_duration;

/// Bind resolution steps per issued command. Cyclic binds stop here.
pub const MAX_BIND_DEPTH: usize = 8;

/// Usable without being op.
const SAFE_COMMANDS: &[&str] = &["players", "r", "played", "bind", "unbind", "desc", "commands"];

const ALL_COMMANDS: &[&str] = &[
    "players", "ops", "give", "get", "restart", "uptime", "id", "r", "played", "bind", "unbind",
    "level", "levels", "setlevel", "desc", "commands",
];

enum Next {
    Done,
    /// Run this command next, as if the player had issued it
    Resolve(String),
}

pub(crate) fn describe(command: &str) -> &'static str {
    match command {
        "players" => "players - Lists the players currently online",
        "ops" => "ops - Lists all the ops",
        "give" => "give - Usage: /give <player> <id> <amount> <stacks>",
        "get" => "get - Usage: /get <id> <amount> <stacks>, same as /give, without needing to type your own name",
        "restart" => "restart - Restarts the server",
        "uptime" => "uptime - The amount of time the server has been up",
        "id" => "id - Usage: /id <name>, Example: /id cob will return \"Cobblestone ID: 4\"",
        "r" => "r - Repeats the previous command",
        "desc" => "desc - Usage: /desc <command>, returns a description of the command",
        "played" => "played - The amount of time you have been on this server",
        "bind" => "bind - Usage: /bind <name> <cmd>, <cmd> can now be run with /<name>",
        "unbind" => "unbind - Usage: /unbind <name>, deletes the bind if it exists",
        "commands" => "commands - Lists all available commands",
        "level" => "level - Returns the name of the current level",
        "levels" => "levels - Lists all available levels",
        "setlevel" => "setlevel - Usage: /setlevel <levelname>, sets the current level, restart the server to load it",
        _ => "No such command :/",
    }
}

impl CommandDispatcher {
    pub(super) async fn handle_ingame(&self, player: &str, command: &str) {
        tracing::info!("{} issued /{}", player, command);

        let mut current = command.to_string();
        let mut steps = 0;
        loop {
            match self.run_ingame(player, &current).await {
                Next::Done => break,
                Next::Resolve(next) => {
                    steps += 1;
                    if steps >= MAX_BIND_DEPTH {
                        tracing::debug!("Bind chain of {} stopped at '{}'", player, next);
                        break;
                    }
                    current = next;
                }
            }
        }

        if command != "r" {
            lock(&self.last_commands).insert(player.to_string(), command.to_string());
        }
    }

    async fn run_ingame(&self, player: &str, command: &str) -> Next {
        let tokens: Vec<&str> = command.split(' ').collect();
        let head = tokens[0];

        if ALL_COMMANDS.contains(&head) && !SAFE_COMMANDS.contains(&head) && !lock(&self.ops).contains(player) {
            return Next::Done;
        }

        match head {
            "players" => {
                let names = self.players();
                let plural = if names.len() > 1 { "s" } else { "" };
                let line = format!("{} Player{} online: {}", names.len(), plural, names.join(", "));
                self.tell(player, &line).await;
            }
            "ops" => {
                let line = format!("Ops: {}", lock(&self.ops).names().join(", "));
                self.tell(player, &line).await;
            }
            "give" if tokens.len() > 4 => self.forward(command).await,
            "get" if tokens.len() >= 3 => {
                let line = format!("give {} {}", player, tokens[1..].join(" "));
                self.forward(&line).await;
            }
            "restart" => self.restart_server(Origin::Local).await,
            "uptime" => {
                let line = format!("Uptime: {}", format_duration(self.uptime().await));
                self.tell(player, &line).await;
            }
            "id" if tokens.len() > 1 => {
                let lines: Vec<String> = lock(&self.items)
                    .find(&tokens[1..].join(" "))
                    .iter()
                    .map(|item| format!("{} ID: {}", item.name, item.id))
                    .collect();
                for line in lines {
                    self.tell(player, &line).await;
                }
            }
            "r" => {
                let last = lock(&self.last_commands).get(player).cloned();
                return match last {
                    Some(last) => Next::Resolve(last),
                    None => Next::Done,
                };
            }
            "played" => {
                let (since, total) = {
                    let playtime = lock(&self.playtime);
                    (playtime.since_login(player), playtime.total(player))
                };
                self.tell(player, &format!("Since last login: {}", format_duration(since))).await;
                self.tell(player, &format!("Total: {}", format_duration(total))).await;
            }
            "bind" if tokens.len() > 2 => {
                let mut binds = lock(&self.binds);
                binds.bind(player, tokens[1], &tokens[2..].join(" "));
                if let Err(e) = binds.save() {
                    tracing::warn!("Failed to save binds: {}", e);
                }
            }
            "unbind" if tokens.len() > 1 => {
                let mut binds = lock(&self.binds);
                binds.unbind(player, tokens[1]);
                if let Err(e) = binds.save() {
                    tracing::warn!("Failed to save binds: {}", e);
                }
            }
            "level" => {
                let line = match self.level_name() {
                    Some(level) => format!("Current level: {}", level),
                    None => "Minecraft server settings not loaded".to_string(),
                };
                self.tell(player, &line).await;
            }
            "levels" => {
                self.tell(player, "Levels:").await;
                for level in scan_levels(&self.layout.root) {
                    self.tell(player, &level).await;
                }
            }
            "setlevel" if tokens.len() > 1 => {
                let line = self.set_level(tokens[1]).await;
                self.tell(player, &line).await;
            }
            "desc" if tokens.len() > 1 => self.tell(player, describe(tokens[1])).await,
            "commands" => {
                let list = if lock(&self.ops).contains(player) {
                    ALL_COMMANDS.join(", ")
                } else {
                    SAFE_COMMANDS.join(", ")
                };
                self.tell(player, &list).await;
                self.tell(player, "Use /desc <command> for more information").await;
            }
            _ if ALL_COMMANDS.contains(&head) => {}
            _ => {
                let bound = lock(&self.binds).get(player, head).map(String::from);
                if let Some(bound) = bound {
                    return Next::Resolve(bound);
                }
            }
        }
        Next::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(describe("r"), "r - Repeats the previous command");
        assert_eq!(describe("nope"), "No such command :/");
        for command in ALL_COMMANDS {
            assert_ne!(describe(command), "No such command :/", "{}", command);
        }
    }

    #[test]
    fn test_safe_commands_are_known() {
        assert!(SAFE_COMMANDS.iter().all(|c| ALL_COMMANDS.contains(c)));
        assert_eq!(SAFE_COMMANDS.join(", "), "players, r, played, bind, unbind, desc, commands");
    }
}
