//! Autocomplete trees for the demo `jira` and `agenda` commands, and the dynamic list
//! endpoint their arguments point at.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::host::{HostError, Post, SYSTEM_ADMIN_ROLE};
use crate::plugin::Plugin;

pub const COMMAND_TRIGGER_JIRA: &str = "jira";
pub const COMMAND_TRIGGER_AGENDA: &str = "agenda";
pub const DYNAMIC_ARGUMENT_PATH: &str = "/dynamic_arg_test_url";

const URL_PATTERN: &str = "https?:\\/\\/(www\\.)?[-a-zA-Z0-9@:%._\\+~#=]{1,256}\\.\
                           [a-zA-Z0-9()]{1,6}\\b([-a-zA-Z0-9()@:%_\\+.~#?&//=]*)";

/// Query parameters echoed back by the dynamic argument endpoint, in display order.
const DYNAMIC_ARGUMENT_KEYS: [&str; 11] = [
    "user_input",
    "parsed",
    "root_id",
    "parent_id",
    "user_id",
    "site_url",
    "request_id",
    "session_id",
    "ip_address",
    "accept_language",
    "user_agent",
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocompleteListItem {
    pub item: String,
    pub hint: String,
    pub help_text: String,
}

impl AutocompleteListItem {
    pub fn new(item: &str, hint: &str, help_text: &str) -> Self {
        Self { item: item.to_owned(), hint: hint.to_owned(), help_text: help_text.to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArgumentKind {
    Text { hint: String, pattern: String },
    StaticList { items: Vec<AutocompleteListItem> },
    DynamicList { fetch_url: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocompleteArgument {
    /// Set for named (`--name`) arguments only.
    pub name: Option<String>,
    pub help_text: String,
    pub required: bool,
    pub kind: ArgumentKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocompleteData {
    pub trigger: String,
    pub hint: String,
    pub help_text: String,
    pub role_id: Option<String>,
    pub arguments: Vec<AutocompleteArgument>,
    pub sub_commands: Vec<AutocompleteData>,
}

impl AutocompleteData {
    pub fn new(trigger: &str, hint: &str, help_text: &str) -> Self {
        Self {
            trigger: trigger.to_owned(),
            hint: hint.to_owned(),
            help_text: help_text.to_owned(),
            ..Self::default()
        }
    }

    pub fn admin_only(mut self) -> Self {
        self.role_id = Some(SYSTEM_ADMIN_ROLE.to_owned());
        self
    }

    pub fn command(mut self, sub_command: AutocompleteData) -> Self {
        self.sub_commands.push(sub_command);
        self
    }

    pub fn text_argument(mut self, help_text: &str, hint: &str, pattern: &str) -> Self {
        self.arguments.push(AutocompleteArgument {
            name: None,
            help_text: help_text.to_owned(),
            required: true,
            kind: ArgumentKind::Text { hint: hint.to_owned(), pattern: pattern.to_owned() },
        });
        self
    }

    pub fn named_text_argument(
        mut self,
        name: &str,
        help_text: &str,
        hint: &str,
        required: bool,
    ) -> Self {
        self.arguments.push(AutocompleteArgument {
            name: Some(name.to_owned()),
            help_text: help_text.to_owned(),
            required,
            kind: ArgumentKind::Text { hint: hint.to_owned(), pattern: String::new() },
        });
        self
    }

    pub fn static_list_argument(
        mut self,
        help_text: &str,
        items: Vec<AutocompleteListItem>,
        required: bool,
    ) -> Self {
        self.arguments.push(AutocompleteArgument {
            name: None,
            help_text: help_text.to_owned(),
            required,
            kind: ArgumentKind::StaticList { items },
        });
        self
    }

    pub fn dynamic_list_argument(mut self, help_text: &str, fetch_url: &str) -> Self {
        self.arguments.push(AutocompleteArgument {
            name: None,
            help_text: help_text.to_owned(),
            required: true,
            kind: ArgumentKind::DynamicList { fetch_url: fetch_url.to_owned() },
        });
        self
    }

    pub fn find(&self, trigger: &str) -> Option<&AutocompleteData> {
        self.sub_commands.iter().find(|sub_command| sub_command.trigger == trigger)
    }
}

pub fn agenda_autocomplete() -> AutocompleteData {
    let next_week = "If `next-week` is provided, it will queue for the meeting in the next \
                     calendar week.";

    AutocompleteData::new(
        COMMAND_TRIGGER_AGENDA,
        "[command]",
        "Available commands: list, queue, setting, help",
    )
    .command(
        AutocompleteData::new("list", "", "Show a list of items queued for the next meeting")
            .command(AutocompleteData::new(
                "next-week",
                "(optional)",
                "If `next-week` is provided, it will list the agenda for the next calendar week.",
            )),
    )
    .command(
        AutocompleteData::new("queue", "", "Queue `message` as a topic on the next meeting.")
            .static_list_argument(
                next_week,
                vec![AutocompleteListItem::new("next-week", "(optional)", next_week)],
                false,
            )
            .text_argument(
                "Creates a post for user with the given message for the next meeting date.",
                "message",
                "",
            ),
    )
    .command(
        AutocompleteData::new("setting", "", "Update the setting.")
            .command(
                AutocompleteData::new("schedule", "", "Update schedule.").text_argument(
                    "Must be between 1-5",
                    "weekday",
                    "",
                ),
            )
            .command(
                AutocompleteData::new("hashtag", "", "Update hashtag.").text_argument(
                    "input hashtag",
                    "Default: Jan02",
                    "",
                ),
            ),
    )
    .command(AutocompleteData::new("help", "", "Mattermost Agenda plugin slash command help"))
}

pub fn jira_autocomplete() -> AutocompleteData {
    let issues = "List of issues is downloading from your Jira account";

    let install = AutocompleteData::new(
        "install",
        "[cloud/server]",
        "Connect Mattermost to a Jira instance",
    )
    .admin_only()
    .command(
        AutocompleteData::new("cloud", "[URL]", "Connect to a Jira Cloud instance")
            .text_argument("input URL of the Jira Cloud instance", "[URL]", URL_PATTERN),
    )
    .command(
        AutocompleteData::new("server", "", "Connect to a Jira Server or Data Center instance")
            .text_argument(
                "input URL of the Jira Server or Data Center instance",
                "[URL]",
                URL_PATTERN,
            ),
    );

    let uninstall = AutocompleteData::new(
        "uninstall",
        "[cloud/server]",
        "Disconnect Mattermost from a Jira instance",
    )
    .admin_only()
    .command(
        AutocompleteData::new("cloud", "[URL]", "Disconnect from a Jira Cloud instance")
            .text_argument("input URL of the Jira Cloud instance", "[URL]", URL_PATTERN),
    )
    .command(
        AutocompleteData::new(
            "server",
            "[URL]",
            "Disconnect from a Jira Server or Data Center instance",
        )
        .text_argument(
            "input URL of the Jira Server or Data Center instance",
            "[URL]",
            URL_PATTERN,
        ),
    );

    AutocompleteData::new(
        COMMAND_TRIGGER_JIRA,
        "[command]",
        "Available commands: connect, assign, disconnect, create, transition, view, subscribe, \
         settings, install cloud/server, uninstall cloud/server, help",
    )
    .command(
        AutocompleteData::new(
            "connect",
            "[url]",
            "Connect your Mattermost account to your Jira account",
        )
        .text_argument("connect to the server", "[url]", ""),
    )
    .command(AutocompleteData::new(
        "disconnect",
        "",
        "Disconnect your Mattermost account from your Jira account",
    ))
    .command(
        AutocompleteData::new("assign", "[issue] [user]", "Change the assignee of a Jira issue")
            .dynamic_list_argument(issues, "dynamic_issues")
            .dynamic_list_argument(
                "List of assignees is downloading from your Jira account",
                "dynamic_users",
            ),
    )
    .command(
        AutocompleteData::new("create", "[issue text]", "Create a new Issue").text_argument(
            "This text is optional, will be inserted into the description field",
            "[text]",
            "",
        ),
    )
    .command(
        AutocompleteData::new("transition", "[issue]", "Change the state of a Jira issue")
            .dynamic_list_argument(issues, "dynamic_issues")
            .dynamic_list_argument(
                "List of states is downloading from your Jira account",
                "dynamic_states",
            ),
    )
    .command(AutocompleteData::new(
        "subscribe",
        "",
        "Configure the Jira notifications sent to this channel",
    ))
    .command(
        AutocompleteData::new("view", "[issue]", "View the details of a specific Jira issue")
            .dynamic_list_argument(issues, "dynamic_issues"),
    )
    .command(
        AutocompleteData::new("settings", "[notifications/...]", "Update your user settings")
            .command(
                AutocompleteData::new(
                    "notifications",
                    "[on/off]",
                    "Turn notifications on or off",
                )
                .static_list_argument(
                    "Turn notifications on or off",
                    vec![
                        AutocompleteListItem::new("on", "", "Turn notifications on"),
                        AutocompleteListItem::new("off", "", "Turn notifications off"),
                    ],
                    true,
                ),
            ),
    )
    .command(
        AutocompleteData::new("timezone", "", "Update your timezone").named_text_argument(
            "zone",
            "Set timezone",
            "[UTC+07:00]",
            true,
        ),
    )
    .command(install)
    .command(uninstall)
}

#[derive(Debug, Error)]
pub enum DynamicArgumentError {
    #[error("Error getting channels: {0}")]
    Channel(HostError),
    #[error("Error getting team: {0}")]
    Team(HostError),
    #[error("Error getting user: {0}")]
    User(HostError),
    #[error("Error creating post: {0}")]
    Post(HostError),
}

impl Plugin {
    /// Posts who triggered a dynamic argument lookup, and with which arguments, into the
    /// requesting channel, then returns the suggestion list.
    pub async fn dynamic_argument_suggestions(
        &self,
        query: &HashMap<String, String>,
    ) -> Result<Vec<AutocompleteListItem>, DynamicArgumentError> {
        let param = |key: &str| query.get(key).map(String::as_str).unwrap_or_default();

        let channel = self
            .host
            .get_channel(param("channel_id"))
            .await
            .map_err(DynamicArgumentError::Channel)?;
        let team =
            self.host.get_team(param("team_id")).await.map_err(DynamicArgumentError::Team)?;
        let user =
            self.host.get_user(param("user_id")).await.map_err(DynamicArgumentError::User)?;

        let arguments: String = DYNAMIC_ARGUMENT_KEYS
            .iter()
            .map(|key| format!("  * {key}:{}\n", param(key)))
            .collect();
        let message = format!(
            "dynamic argument was triggered by **{}** from team **{}** in the **{}** channel, \
             with these arguments\n\n{arguments}",
            user.full_name(),
            team.display_name,
            channel.display_name,
        );
        let post =
            Post::new(self.app.bot_id(), channel.id.clone(), message).with_root(param("root_id"));
        self.host.create_post(post).await.map_err(DynamicArgumentError::Post)?;

        info!(
            event_name = "plugin.autocomplete.dynamic_argument",
            channel_id = %channel.id,
            user_id = %user.id,
            "answered dynamic argument lookup"
        );
        Ok(vec![
            AutocompleteListItem::new("suggestion 1", "(hint)", "help text 1"),
            AutocompleteListItem::new("suggestion 2", "(hint)", "help text 2"),
        ])
    }
}
