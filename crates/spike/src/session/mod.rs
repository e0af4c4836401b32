//! The session-aware shell: slash commands, direct tool invocation with
//! fuzzy resolution, and the visibility reasoning layered over the catalog.

mod args;
mod fuzzy;
mod state;
mod visibility;

pub use args::{assemble_arguments, coerce_answer, record_call_result, InvalidJsonArgs};
pub use fuzzy::fuzzy_score;
pub use state::SessionState;
pub use visibility::{
    gated_by, group_tools, is_config_prerequisite, is_dependent, is_entry_point, is_visible,
    stripped_name, tool_prefix, ToolGroup,
};

use serde_json::Value;

use crate::apps::AppRegistry;
use crate::fleet::Fleet;
use crate::mcp::NamespacedTool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Tools,
    Apps,
    Servers,
    Clear,
    Model,
    Help,
    Quit,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand<'a> {
    Builtin(Builtin),
    /// Anything that is not a built-in is a direct tool invocation; `args` is
    /// the raw remainder after the first space.
    Invoke { name: &'a str, args: &'a str },
}

/// Splits a `/command rest...` input. Returns `None` for lines that do not
/// start with `/`.
pub fn parse_slash(input: &str) -> Option<ShellCommand<'_>> {
    let rest = input.strip_prefix('/')?;
    let (command, remainder) = match rest.split_once(' ') {
        Some((command, remainder)) => (command, remainder.trim()),
        None => (rest, ""),
    };

    let builtin = match command {
        "tools" => Some(Builtin::Tools),
        "apps" => Some(Builtin::Apps),
        "servers" => Some(Builtin::Servers),
        "clear" => Some(Builtin::Clear),
        "model" => Some(Builtin::Model),
        "help" => Some(Builtin::Help),
        "quit" => Some(Builtin::Quit),
        "exit" => Some(Builtin::Exit),
        _ => None,
    };

    Some(match builtin {
        Some(builtin) => ShellCommand::Builtin(builtin),
        None => ShellCommand::Invoke {
            name: command,
            args: remainder,
        },
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub tool: NamespacedTool,
    pub ambiguous: bool,
}

/// Resolves a user-typed name against the catalog: exact wire name, exact
/// original name, exact stripped name, then fuzzy. When the best fuzzy score
/// is at least twice the runner-up it is selected outright; otherwise the
/// best candidate is still used but flagged ambiguous.
pub fn resolve_tool(query: &str, tools: &[NamespacedTool], sep: &str) -> Option<Resolved> {
    let exact = tools
        .iter()
        .find(|t| t.namespaced_name == query)
        .or_else(|| tools.iter().find(|t| t.original_name() == query))
        .or_else(|| tools.iter().find(|t| stripped_name(t, sep) == query));
    if let Some(tool) = exact {
        return Some(Resolved {
            tool: tool.clone(),
            ambiguous: false,
        });
    }

    let mut scored: Vec<(f64, &NamespacedTool)> = tools
        .iter()
        .map(|t| (fuzzy_score(query, &t.namespaced_name), t))
        .filter(|(score, _)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    match scored.as_slice() {
        [] => None,
        [(_, tool)] => Some(Resolved {
            tool: (*tool).clone(),
            ambiguous: false,
        }),
        [(best, tool), (runner_up, _), ..] => Some(Resolved {
            tool: (*tool).clone(),
            ambiguous: *best < 2.0 * runner_up,
        }),
    }
}

/// Interactive input channel for missing required parameters. `None` means
/// no channel is available (non-interactive shells).
pub trait Prompter {
    fn prompt(&mut self, question: &str) -> Option<String>;
}

/// Prompter for non-interactive contexts.
pub struct NoPrompter;

impl Prompter for NoPrompter {
    fn prompt(&mut self, _question: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ShellOutcome {
    Output(String),
    Quit,
}

pub struct ShellSession {
    state: SessionState,
    registry: AppRegistry,
    model: String,
}

impl ShellSession {
    pub fn new(registry: AppRegistry) -> Self {
        Self {
            state: SessionState::default(),
            registry,
            model: "claude-sonnet-4-5".to_string(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn registry_mut(&mut self) -> &mut AppRegistry {
        &mut self.registry
    }

    /// Handles one line of shell input against the fleet.
    pub async fn handle_line(
        &mut self,
        fleet: &mut Fleet,
        line: &str,
        prompter: &mut dyn Prompter,
    ) -> ShellOutcome {
        let line = line.trim();
        if line.is_empty() {
            return ShellOutcome::Output(String::new());
        }
        let Some(command) = parse_slash(line) else {
            return ShellOutcome::Output(
                "Type /help for commands, or /<tool> to invoke a tool.".to_string(),
            );
        };

        match command {
            ShellCommand::Builtin(Builtin::Quit) | ShellCommand::Builtin(Builtin::Exit) => {
                ShellOutcome::Quit
            }
            ShellCommand::Builtin(Builtin::Help) => ShellOutcome::Output(
                concat!(
                    "Commands:\n",
                    "  /tools            show visible tools\n",
                    "  /apps             show known apps\n",
                    "  /servers          show connected upstreams\n",
                    "  /clear            reset session state\n",
                    "  /model            show the chat model\n",
                    "  /quit, /exit      leave the shell\n",
                    "  /<tool> [json]    invoke a tool directly\n",
                )
                .to_string(),
            ),
            ShellCommand::Builtin(Builtin::Model) => {
                ShellOutcome::Output(format!("model: {}", self.model))
            }
            ShellCommand::Builtin(Builtin::Clear) => {
                self.state = SessionState::default();
                ShellOutcome::Output("Session state cleared.".to_string())
            }
            ShellCommand::Builtin(Builtin::Tools) => {
                let tools = fleet.all_tools();
                let groups = group_tools(&tools, &self.state, &self.registry, fleet.separator());
                let mut out = String::new();
                for group in groups {
                    out.push_str(&group.render());
                }
                if out.is_empty() {
                    out = "No tools available.".to_string();
                }
                ShellOutcome::Output(out)
            }
            ShellCommand::Builtin(Builtin::Apps) => {
                let mut out = String::new();
                for app in self.registry.iter() {
                    out.push_str(&format!(
                        "{} {}: {} ({} tools)\n",
                        app.icon,
                        app.name,
                        app.tagline,
                        app.tool_names.len()
                    ));
                }
                if out.is_empty() {
                    out = "No apps known.".to_string();
                }
                ShellOutcome::Output(out)
            }
            ShellCommand::Builtin(Builtin::Servers) => {
                let counts = fleet.tool_counts();
                let mut out = String::new();
                for name in fleet.server_names() {
                    let connected = fleet
                        .upstream(&name)
                        .is_some_and(|u| u.connected());
                    let count = counts.get(&name).copied().unwrap_or(0);
                    let status = if connected { "connected" } else { "disconnected" };
                    out.push_str(&format!("{name}: {status}, {count} tools\n"));
                }
                if out.is_empty() {
                    out = "No upstreams configured.".to_string();
                }
                ShellOutcome::Output(out)
            }
            ShellCommand::Invoke { name, args } => {
                self.invoke_tool(fleet, name, args, prompter).await
            }
        }
    }

    async fn invoke_tool(
        &mut self,
        fleet: &mut Fleet,
        name: &str,
        raw_args: &str,
        prompter: &mut dyn Prompter,
    ) -> ShellOutcome {
        let tools = fleet.all_tools();
        let sep = fleet.separator().to_string();
        let Some(resolved) = resolve_tool(name, &tools, &sep) else {
            return ShellOutcome::Output(format!(
                "No tool matches {name:?}. Try /tools to see what is available."
            ));
        };

        let mut notice = String::new();
        if resolved.ambiguous {
            notice = format!(
                "(ambiguous match, using {})\n",
                resolved.tool.namespaced_name
            );
        }

        let (mut arguments, missing) =
            match assemble_arguments(&resolved.tool, raw_args, &self.state) {
                Ok(assembled) => assembled,
                Err(err) => {
                    return ShellOutcome::Output(format!(
                        "{err}. Arguments must be a JSON object, e.g. {{\"key\": \"value\"}}."
                    ));
                }
            };

        for param in missing {
            let Some(answer) = prompter.prompt(&format!("{param}: ")) else {
                return ShellOutcome::Output(format!(
                    "Missing required parameter {param:?} for {}. \
                     Pass arguments as JSON: /{} {{\"{param}\": ...}}",
                    resolved.tool.namespaced_name, resolved.tool.namespaced_name,
                ));
            };
            if answer.trim().is_empty() {
                return ShellOutcome::Output("Aborted.".to_string());
            }
            arguments.insert(
                param.clone(),
                coerce_answer(&answer, &resolved.tool, &param),
            );
        }

        let wire_name = resolved.tool.namespaced_name.clone();
        match fleet.call_tool(&wire_name, Value::Object(arguments)).await {
            Ok(result) => {
                record_call_result(&mut self.state, &resolved.tool, &sep, &result);
                let text = result.text_content();
                let body = if result.is_error() {
                    format!("Error: {text}")
                } else {
                    text
                };
                ShellOutcome::Output(format!("{notice}{body}"))
            }
            Err(err) => ShellOutcome::Output(format!("{notice}Error: {err}")),
        }
    }
}
