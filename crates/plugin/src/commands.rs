//! Slash commands: the demo commands plus the session debug commands.

use serde_json::{json, Map};
use tracing::{error, info};

use wabridge_core::domain::session::SessionId;

use crate::actions::ephemeral_actions;
use crate::autocomplete::{
    agenda_autocomplete, jira_autocomplete, COMMAND_TRIGGER_AGENDA, COMMAND_TRIGGER_JIRA,
};
use crate::dialogs::{
    attachment_props, dialog_with_introduction_text, dialog_with_sample_elements,
    dialog_without_elements, plugin_url, OpenDialogRequest, PostAction, COMMAND_DIALOG_HELP,
    DIALOG_INTRODUCTION_TEXT, DIALOG_STATE_RELATIVE_CALLBACK_URL, DIALOG_STATE_SOME,
};
use crate::host::{Command, CommandArgs, CommandResponse, HostError, Post};
use crate::plugin::Plugin;

pub const COMMAND_TRIGGER_CRASH: &str = "crash";
pub const COMMAND_TRIGGER_HOOKS: &str = "demo_plugin";
pub const COMMAND_TRIGGER_DIALOG: &str = "dialog";
pub const COMMAND_TRIGGER_EPHEMERAL: &str = "ephemeral";
pub const COMMAND_TRIGGER_EPHEMERAL_OVERRIDE: &str = "ephemeral_override";
pub const COMMAND_TRIGGER_INTERACTIVE: &str = "interactive";

pub const COMMAND_CREATE_SESSION: &str = "createsession";
pub const COMMAND_CLOSE_SESSION: &str = "closesession";
pub const COMMAND_GET_SESSION: &str = "getsession";
pub const COMMAND_LIST_SESSIONS: &str = "listsessions";

const EPHEMERAL_OVERRIDE_POST_TYPE: &str = "custom_demo_plugin_ephemeral";

fn command(trigger: &str, hint: &str, description: &str) -> Command {
    Command {
        trigger: trigger.to_owned(),
        auto_complete: true,
        auto_complete_hint: hint.to_owned(),
        auto_complete_desc: description.to_owned(),
        display_name: String::new(),
        autocomplete_data: None,
    }
}

/// Every command the plugin answers, in registration order.
pub fn plugin_commands() -> Vec<Command> {
    let mut commands = vec![
        command(
            COMMAND_TRIGGER_HOOKS,
            "(true|false)",
            "Enables or disables the demo plugin hooks.",
        ),
        command(COMMAND_TRIGGER_CRASH, "", "Crashes Demo Plugin"),
        command(COMMAND_TRIGGER_EPHEMERAL, "", "Demonstrates an ephemeral post capabilities."),
        command(
            COMMAND_TRIGGER_EPHEMERAL_OVERRIDE,
            "",
            "Demonstrates an ephemeral post overriden in the webapp.",
        ),
        Command {
            display_name: "Demo Plugin Command".to_owned(),
            ..command(COMMAND_TRIGGER_DIALOG, "", "Open an Interactive Dialog.")
        },
        command(COMMAND_TRIGGER_INTERACTIVE, "", "Demonstrates interactive message buttons."),
        Command {
            autocomplete_data: Some(jira_autocomplete()),
            ..command(COMMAND_TRIGGER_JIRA, "", "Demonstrates autocomplete with dynamic lists.")
        },
        Command {
            autocomplete_data: Some(agenda_autocomplete()),
            ..command(COMMAND_TRIGGER_AGENDA, "", "Demonstrates nested autocomplete commands.")
        },
    ];
    commands.extend(
        [COMMAND_CREATE_SESSION, COMMAND_CLOSE_SESSION, COMMAND_GET_SESSION, COMMAND_LIST_SESSIONS]
            .into_iter()
            .map(|trigger| command(trigger, "", "")),
    );
    commands
}

fn plain(text: impl Into<String>) -> CommandResponse {
    CommandResponse { response_type: None, text: text.into() }
}

impl Plugin {
    pub(crate) async fn register_commands(&self) -> Result<(), HostError> {
        for command in plugin_commands() {
            let trigger = command.trigger.clone();
            self.host.register_command(command).await.map_err(|register_error| {
                error!(
                    event_name = "plugin.command.register_failed",
                    trigger = %trigger,
                    error = %register_error,
                    "failed to register command"
                );
                register_error
            })?;
        }
        Ok(())
    }

    /// Runs a slash command previously registered with the host.
    pub async fn execute_command(&self, args: CommandArgs) -> CommandResponse {
        let fields: Vec<&str> = args.command.split_whitespace().collect();
        let Some(first) = fields.first() else {
            return CommandResponse::empty();
        };
        let trigger = first.trim_start_matches('/');

        info!(
            event_name = "plugin.command.execute",
            trigger,
            user_id = %args.user_id,
            "executing command"
        );
        match trigger {
            COMMAND_TRIGGER_CRASH => self.execute_crash().await,
            COMMAND_TRIGGER_HOOKS => self.execute_hooks(&args).await,
            COMMAND_TRIGGER_EPHEMERAL => self.execute_ephemeral(&args).await,
            COMMAND_TRIGGER_EPHEMERAL_OVERRIDE => self.execute_ephemeral_override(&args).await,
            COMMAND_TRIGGER_DIALOG => self.execute_dialog(&args, &fields).await,
            COMMAND_TRIGGER_INTERACTIVE => self.execute_interactive(&args).await,
            COMMAND_CREATE_SESSION => self.execute_create_session(&args).await,
            COMMAND_CLOSE_SESSION => self.execute_close_session(&fields).await,
            COMMAND_GET_SESSION => self.execute_get_session(&args).await,
            COMMAND_LIST_SESSIONS => self.execute_list_sessions().await,
            _ => CommandResponse::ephemeral(format!("Unknown command: {}", args.command)),
        }
    }

    /// Takes the plugin out of service the way a crash would, without aborting the process.
    async fn execute_crash(&self) -> CommandResponse {
        error!(event_name = "plugin.crash", "crash requested, shutting plugin hooks down");
        self.configuration.set_enabled(false);
        self.stop_job().await;
        self.emit_status_change().await;
        CommandResponse::ephemeral("Crashing plugin")
    }

    async fn execute_hooks(&self, args: &CommandArgs) -> CommandResponse {
        let disabled = self.configuration.get().disabled;

        if args.command.ends_with("true") {
            if !disabled {
                return CommandResponse::ephemeral("The demo plugin hooks are already enabled.");
            }
            self.configuration.set_enabled(true);
            self.emit_status_change().await;
            return CommandResponse::ephemeral("Enabled demo plugin hooks.");
        }

        if args.command.ends_with("false") {
            if disabled {
                return CommandResponse::ephemeral("The demo plugin hooks are already disabled.");
            }
            self.configuration.set_enabled(false);
            self.emit_status_change().await;
            return CommandResponse::ephemeral("Disabled demo plugin hooks.");
        }

        CommandResponse::ephemeral(format!("Unknown command action: {}", args.command))
    }

    async fn execute_ephemeral(&self, args: &CommandArgs) -> CommandResponse {
        let site_url = self.site_url().await;
        let post = Post::new(String::new(), args.channel_id.clone(), "test ephemeral actions")
            .with_props(ephemeral_actions(&site_url, &self.options.plugin_id, 0));
        self.host.send_ephemeral_post(&args.user_id, post).await;
        CommandResponse::empty()
    }

    async fn execute_ephemeral_override(&self, args: &CommandArgs) -> CommandResponse {
        let mut props = Map::new();
        props.insert("type".to_owned(), json!(EPHEMERAL_OVERRIDE_POST_TYPE));
        let post = Post::new(
            String::new(),
            args.channel_id.clone(),
            "This is a demo of overriding an ephemeral post.",
        )
        .with_props(props);
        self.host.send_ephemeral_post(&args.user_id, post).await;
        CommandResponse::empty()
    }

    async fn execute_dialog(&self, args: &CommandArgs, fields: &[&str]) -> CommandResponse {
        let variant = if fields.len() == 2 { fields[1] } else { "" };
        let plugin_id = self.options.plugin_id.as_str();
        let site_url = self.site_url().await;
        let absolute = |path: &str| plugin_url(Some(&site_url), plugin_id, path);
        let relative = |path: &str| plugin_url(None, plugin_id, path);

        let (url, dialog) = match variant {
            "help" => return CommandResponse::ephemeral(COMMAND_DIALOG_HELP),
            "" => (absolute("/dialog/1"), dialog_with_sample_elements()),
            "no-elements" => (absolute("/dialog/2"), dialog_without_elements(DIALOG_STATE_SOME)),
            "relative-callback-url" => (
                relative("/dialog/2"),
                dialog_without_elements(DIALOG_STATE_RELATIVE_CALLBACK_URL),
            ),
            "introduction-text" => {
                (absolute("/dialog/1"), dialog_with_introduction_text(DIALOG_INTRODUCTION_TEXT))
            }
            "error" => (relative("/dialog/error"), dialog_with_sample_elements()),
            "error-no-elements" => {
                (relative("/dialog/error"), dialog_without_elements(DIALOG_STATE_SOME))
            }
            other => return CommandResponse::ephemeral(format!("Unknown command: {other}")),
        };

        let request = OpenDialogRequest { trigger_id: args.trigger_id.clone(), url, dialog };
        if let Err(open_error) = self.host.open_interactive_dialog(request).await {
            error!(
                event_name = "plugin.dialog.open_failed",
                error = %open_error,
                "failed to open interactive dialog"
            );
            return CommandResponse::ephemeral("Failed to open Interactive Dialog");
        }
        CommandResponse::empty()
    }

    async fn execute_interactive(&self, args: &CommandArgs) -> CommandResponse {
        let button = PostAction::button(
            "Interactive Button",
            plugin_url(None, &self.options.plugin_id, "/interactive/button/1"),
        );
        let post = Post::new(
            self.configuration.get().bot_user_id.clone(),
            args.channel_id.clone(),
            "Test interactive button",
        )
        .with_root(args.root_id.clone())
        .with_props(attachment_props(vec![button]));

        if let Err(post_error) = self.host.create_post(post).await {
            error!(
                event_name = "plugin.interactive.post_failed",
                error = %post_error,
                "failed to create interactive post"
            );
            return CommandResponse::ephemeral("Failed to create post");
        }
        CommandResponse::empty()
    }

    async fn execute_create_session(&self, args: &CommandArgs) -> CommandResponse {
        match self.app.create_session(&args.user_id).await {
            Ok(session) => {
                self.publish_session_update_logged(&session.user_id).await;
                plain(format!("Session created successfully with ID: {}", session.id))
            }
            Err(create_error) => plain(format!("Failed to create session: {create_error}")),
        }
    }

    async fn execute_close_session(&self, fields: &[&str]) -> CommandResponse {
        let Some(id) = fields.get(1) else {
            return plain(format!("Usage: /{COMMAND_CLOSE_SESSION} <session_id>"));
        };
        match self.app.close_session(&SessionId(id.to_string())).await {
            Ok(session) => {
                self.publish_session_update_logged(&session.user_id).await;
                plain(format!("Session closed: {}", session.id))
            }
            Err(close_error) => plain(format!("Failed to close session: {close_error}")),
        }
    }

    async fn execute_get_session(&self, args: &CommandArgs) -> CommandResponse {
        match self.app.get_session_by_user(&args.user_id).await {
            Ok(session) => plain(format!("Open session ID: {}", session.id)),
            Err(lookup_error) if lookup_error.is_not_found() => {
                plain("No open session for this user")
            }
            Err(lookup_error) => plain(format!("Failed to get session: {lookup_error}")),
        }
    }

    async fn execute_list_sessions(&self) -> CommandResponse {
        match self.app.list_unclosed_sessions().await {
            Ok(sessions) => {
                let ids: Vec<String> =
                    sessions.iter().map(|session| session.id.to_string()).collect();
                plain(format!("Unclosed session IDs: {}", ids.join(", ")))
            }
            Err(list_error) => plain(format!("Failed to list sessions: {list_error}")),
        }
    }

    async fn publish_session_update_logged(&self, user_id: &str) {
        if let Err(publish_error) = self.app.publish_session_update(user_id).await {
            error!(
                event_name = "plugin.session.publish_failed",
                user_id,
                error = %publish_error,
                "failed to publish session update"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        plugin_commands, COMMAND_TRIGGER_AGENDA, COMMAND_TRIGGER_DIALOG, COMMAND_TRIGGER_JIRA,
    };
    use crate::host::{CommandArgs, CommandResponse, ResponseType};
    use crate::plugin::testing::configured;
    use crate::plugin::STATUS_CHANGE_EVENT;

    fn args(command: &str) -> CommandArgs {
        CommandArgs {
            command: command.to_owned(),
            user_id: "u1".to_owned(),
            channel_id: "c1".to_owned(),
            trigger_id: "trigger".to_owned(),
            ..CommandArgs::default()
        }
    }

    #[test]
    fn dialog_command_has_a_display_name() {
        let commands = plugin_commands();
        let dialog = commands
            .iter()
            .find(|command| command.trigger == COMMAND_TRIGGER_DIALOG)
            .expect("dialog command");
        assert_eq!(dialog.display_name, "Demo Plugin Command");
        assert!(commands.iter().all(|command| command.auto_complete));
    }

    #[test]
    fn autocomplete_only_commands_carry_their_trees() {
        let commands = plugin_commands();
        let trees: Vec<&str> = commands
            .iter()
            .filter_map(|command| command.autocomplete_data.as_ref())
            .map(|data| data.trigger.as_str())
            .collect();
        assert_eq!(trees, vec![COMMAND_TRIGGER_JIRA, COMMAND_TRIGGER_AGENDA]);
    }

    #[tokio::test]
    async fn hooks_toggle_reports_state_and_emits_status() {
        let fixture = configured().await;
        let plugin = &fixture.plugin;

        let response = plugin.execute_command(args("/demo_plugin true")).await;
        assert_eq!(response.text, "The demo plugin hooks are already enabled.");
        assert_eq!(response.response_type, Some(ResponseType::Ephemeral));

        let response = plugin.execute_command(args("/demo_plugin false")).await;
        assert_eq!(response.text, "Disabled demo plugin hooks.");
        assert!(!plugin.is_enabled());
        let response = plugin.execute_command(args("/demo_plugin false")).await;
        assert_eq!(response.text, "The demo plugin hooks are already disabled.");

        let response = plugin.execute_command(args("/demo_plugin true")).await;
        assert_eq!(response.text, "Enabled demo plugin hooks.");
        let response = plugin.execute_command(args("/demo_plugin maybe")).await;
        assert_eq!(response.text, "Unknown command action: /demo_plugin maybe");

        let events = fixture.host.events().await;
        let statuses: Vec<_> = events
            .iter()
            .filter(|event| event.event == STATUS_CHANGE_EVENT)
            .map(|event| event.payload["enabled"].clone())
            .collect();
        assert_eq!(statuses, vec![serde_json::json!(false), serde_json::json!(true)]);
    }

    #[tokio::test]
    async fn crash_disables_the_hooks() {
        let fixture = configured().await;
        let response = fixture.plugin.execute_command(args("/crash")).await;
        assert_eq!(response.text, "Crashing plugin");
        assert!(!fixture.plugin.is_enabled());
    }

    #[tokio::test]
    async fn dialog_variants_open_against_the_right_callback() {
        let fixture = configured().await;
        let plugin = &fixture.plugin;

        assert_eq!(plugin.execute_command(args("/dialog")).await, CommandResponse::empty());
        plugin.execute_command(args("/dialog relative-callback-url")).await;
        plugin.execute_command(args("/dialog error")).await;

        let dialogs = fixture.host.dialogs().await;
        let urls: Vec<_> = dialogs.iter().map(|dialog| dialog.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "http://localhost:8065/plugins/com.mattermost.whatsapp-bridge/dialog/1",
                "/plugins/com.mattermost.whatsapp-bridge/dialog/2",
                "/plugins/com.mattermost.whatsapp-bridge/dialog/error",
            ]
        );
        assert_eq!(dialogs[1].dialog.state, "relativecallbackstate");
        assert_eq!(dialogs[0].trigger_id, "trigger");

        let help = plugin.execute_command(args("/dialog help")).await;
        assert!(help.text.starts_with("###### Interactive Dialog Slash Command Help"));
        let unknown = plugin.execute_command(args("/dialog sideways")).await;
        assert_eq!(unknown.text, "Unknown command: sideways");
    }

    #[tokio::test]
    async fn ephemeral_commands_send_private_posts() {
        let fixture = configured().await;
        fixture.plugin.execute_command(args("/ephemeral")).await;
        fixture.plugin.execute_command(args("/ephemeral_override")).await;

        let ephemeral = fixture.host.ephemeral_posts().await;
        assert_eq!(ephemeral.len(), 2);
        assert_eq!(ephemeral[0].0, "u1");
        assert_eq!(ephemeral[0].1.message, "test ephemeral actions");
        assert_eq!(ephemeral[0].1.props["attachments"][0]["actions"][0]["name"], "Update");
        assert_eq!(ephemeral[1].1.props["type"], "custom_demo_plugin_ephemeral");
    }

    #[tokio::test]
    async fn interactive_posts_a_button_as_the_bot() {
        let fixture = configured().await;
        let channel_id = fixture
            .plugin
            .configuration()
            .demo_channel_for_team(&fixture.team.id)
            .map(str::to_owned)
            .expect("demo channel");

        let response = fixture
            .plugin
            .execute_command(CommandArgs { channel_id, ..args("/interactive") })
            .await;
        assert_eq!(response, CommandResponse::empty());

        let post = fixture.host.posts().await.pop().expect("post");
        assert_eq!(post.message, "Test interactive button");
        assert_eq!(post.user_id, fixture.plugin.configuration().bot_user_id);
        assert_eq!(
            post.props["attachments"][0]["actions"][0]["integration"]["url"],
            "/plugins/com.mattermost.whatsapp-bridge/interactive/button/1"
        );

        let failed = fixture.plugin.execute_command(args("/interactive")).await;
        assert_eq!(failed.text, "Failed to create post");
    }

    #[tokio::test]
    async fn session_debug_commands_drive_the_store() {
        let fixture = configured().await;
        let plugin = &fixture.plugin;

        let created = plugin.execute_command(args("/createsession")).await;
        let id = created
            .text
            .strip_prefix("Session created successfully with ID: ")
            .expect("created")
            .to_owned();

        let listed = plugin.execute_command(args("/listsessions")).await;
        assert_eq!(listed.text, format!("Unclosed session IDs: {id}"));
        let open = plugin.execute_command(args("/getsession")).await;
        assert_eq!(open.text, format!("Open session ID: {id}"));

        let closed = plugin.execute_command(args(&format!("/closesession {id}"))).await;
        assert_eq!(closed.text, format!("Session closed: {id}"));
        let again = plugin.execute_command(args(&format!("/closesession {id}"))).await;
        assert!(again.text.starts_with("Failed to close session: "));
        let none = plugin.execute_command(args("/getsession")).await;
        assert_eq!(none.text, "No open session for this user");

        let unknown = plugin.execute_command(args("/nope now")).await;
        assert_eq!(unknown.text, "Unknown command: /nope now");
    }
}
