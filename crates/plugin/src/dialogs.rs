//! Interactive dialog and message-action payloads, plus the sample dialogs the
//! `/dialog` command opens.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const DIALOG_ELEMENT_NAME_NUMBER: &str = "somenumber";
pub const DIALOG_ELEMENT_NAME_EMAIL: &str = "someemail";
pub const DIALOG_STATE_SOME: &str = "somestate";
pub const DIALOG_STATE_RELATIVE_CALLBACK_URL: &str = "relativecallbackstate";
pub const DIALOG_INTRODUCTION_TEXT: &str = "**Some** _introductory_ paragraph in Markdown \
    formatted text with [link](https://mattermost.com)";
pub const DIALOG_ICON_URL: &str = "http://www.mattermost.org/wp-content/uploads/2016/04/icon.png";

pub const COMMAND_DIALOG_HELP: &str = "###### Interactive Dialog Slash Command Help\n\
- `/dialog` - Open an Interactive Dialog. Once submitted, user-entered input is posted back \
into a channel.\n\
- `/dialog no-elements` - Open an Interactive Dialog with no elements. Once submitted, user's \
action is posted back into a channel.\n\
- `/dialog relative-callback-url` - Open an Interactive Dialog with relative callback URL. Once \
submitted, user's action is posted back into a channel.\n\
- `/dialog introduction-text` - Open an Interactive Dialog with optional introduction text. \
Once submitted, user's action is posted back into a channel.\n\
- `/dialog error` - Open an Interactive Dialog which always returns an general error.\n\
- `/dialog error-no-elements` - Open an Interactive Dialog with no elements which always \
returns an general error.\n\
- `/dialog help` - Show this help text";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogOption {
    pub text: String,
    pub value: String,
}

impl DialogOption {
    fn new(text: &str, value: &str) -> Self {
        Self { text: text.to_owned(), value: value.to_owned() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogElement {
    pub display_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subtype: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub placeholder: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub help_text: String,
    pub optional: bool,
    pub min_length: u32,
    pub max_length: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub data_source: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<DialogOption>,
}

impl DialogElement {
    fn new(display_name: &str, name: &str, element_type: &str) -> Self {
        Self {
            display_name: display_name.to_owned(),
            name: name.to_owned(),
            element_type: element_type.to_owned(),
            ..Self::default()
        }
    }

    fn subtype(mut self, subtype: &str) -> Self {
        self.subtype = subtype.to_owned();
        self
    }

    fn default_value(mut self, value: &str) -> Self {
        self.default = value.to_owned();
        self
    }

    fn placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = placeholder.to_owned();
        self
    }

    fn help(mut self, help_text: &str) -> Self {
        self.help_text = help_text.to_owned();
        self
    }

    fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    fn length(mut self, min: u32, max: u32) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    fn data_source(mut self, source: &str) -> Self {
        self.data_source = source.to_owned();
        self
    }

    fn options(mut self, options: &[(&str, &str)]) -> Self {
        self.options = options.iter().map(|(text, value)| DialogOption::new(text, value)).collect();
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dialog {
    pub callback_id: String,
    pub title: String,
    pub icon_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub introduction_text: String,
    pub elements: Vec<DialogElement>,
    pub submit_label: String,
    pub notify_on_cancel: bool,
    pub state: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDialogRequest {
    pub trigger_id: String,
    pub url: String,
    pub dialog: Dialog,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitDialogRequest {
    #[serde(rename = "type")]
    pub request_type: String,
    pub callback_id: String,
    pub state: String,
    pub user_id: String,
    pub channel_id: String,
    pub team_id: String,
    pub submission: Map<String, Value>,
    pub cancelled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitDialogResponse {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub errors: std::collections::BTreeMap<String, String>,
}

impl SubmitDialogResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self { error: message.into(), ..Self::default() }
    }

    pub fn field_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = std::collections::BTreeMap::new();
        errors.insert(field.into(), message.into());
        Self { errors, ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.error.is_empty() && self.errors.is_empty()
    }
}

/// Body the host sends when a message button is clicked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostActionIntegrationRequest {
    pub user_id: String,
    pub user_name: String,
    pub channel_id: String,
    pub channel_name: String,
    pub team_id: String,
    pub team_domain: String,
    pub post_id: String,
    pub trigger_id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub data_source: String,
    pub context: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostActionIntegrationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_text: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PostActionIntegration {
    pub url: String,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub context: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PostAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub name: String,
    pub integration: PostActionIntegration,
}

impl PostAction {
    pub fn button(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            action_type: "button".to_owned(),
            name: name.into(),
            integration: PostActionIntegration { url: url.into(), context: Map::new() },
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.integration.context = context;
        self
    }
}

/// Post props holding one attachment with the given buttons.
pub fn attachment_props(actions: Vec<PostAction>) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("attachments".to_owned(), json!([{ "actions": actions }]));
    props
}

/// Absolute URL of a plugin route, or a host-relative one when `site_url` is `None`.
pub fn plugin_url(site_url: Option<&str>, plugin_id: &str, path: &str) -> String {
    match site_url {
        Some(site_url) => format!("{}/plugins/{plugin_id}{path}", site_url.trim_end_matches('/')),
        None => format!("/plugins/{plugin_id}{path}"),
    }
}

const SAMPLE_OPTIONS: &[(&str, &str)] =
    &[("Option1", "opt1"), ("Option2", "opt2"), ("Option3", "opt3")];

pub fn dialog_with_sample_elements() -> Dialog {
    Dialog {
        callback_id: "somecallbackid".to_owned(),
        title: "Test Title".to_owned(),
        icon_url: DIALOG_ICON_URL.to_owned(),
        introduction_text: String::new(),
        elements: vec![
            DialogElement::new("Display Name", "realname", "text")
                .default_value("default text")
                .placeholder("placeholder")
                .help(
                    "This a regular input in an interactive dialog triggered by a test \
                     integration.",
                ),
            DialogElement::new("Email", DIALOG_ELEMENT_NAME_EMAIL, "text")
                .subtype("email")
                .placeholder("placeholder@bladekick.com")
                .help(
                    "This a regular email input in an interactive dialog triggered by a test \
                     integration.",
                ),
            DialogElement::new("Password", "somepassword", "text")
                .subtype("password")
                .placeholder("Password")
                .help(
                    "This a password input in an interactive dialog triggered by a test \
                     integration.",
                ),
            DialogElement::new("Number", DIALOG_ELEMENT_NAME_NUMBER, "text").subtype("number"),
            DialogElement::new("Display Name Long Text Area", "realnametextarea", "textarea")
                .placeholder("placeholder")
                .optional()
                .length(5, 100),
            DialogElement::new("User Selector", "someuserselector", "select")
                .placeholder("Select a user...")
                .help("Choose a user from the list.")
                .optional()
                .length(5, 100)
                .data_source("users"),
            DialogElement::new("Channel Selector", "somechannelselector", "select")
                .placeholder("Select a channel...")
                .help("Choose a channel from the list.")
                .optional()
                .length(5, 100)
                .data_source("channels"),
            DialogElement::new("Option Selector", "someoptionselector", "select")
                .placeholder("Select an option...")
                .help("Choose an option from the list.")
                .options(SAMPLE_OPTIONS),
            DialogElement::new("Option Selector with default", "someoptionselector2", "select")
                .default_value("opt2")
                .placeholder("Select an option...")
                .help("Choose an option from the list.")
                .options(SAMPLE_OPTIONS),
            DialogElement::new("Boolean Selector", "someboolean", "bool")
                .placeholder("Agree to the terms of service")
                .help("You must agree to the terms of service to proceed."),
            DialogElement::new("Boolean Selector", "someboolean_optional", "bool")
                .placeholder("Sign up for monthly emails?")
                .help("It's up to you if you want to get monthly emails.")
                .optional(),
            DialogElement::new(
                "Boolean Selector (default true)",
                "someboolean_default_true",
                "bool",
            )
            .placeholder("Enable secure login")
            .help("You must enable secure login to proceed.")
            .default_value("true"),
            DialogElement::new(
                "Boolean Selector (default false)",
                "someboolean_default_false",
                "bool",
            )
            .placeholder("Agree to the annoying terms of service")
            .help("You must also agree to the annoying terms of service to proceed.")
            .default_value("false"),
            DialogElement::new("Radio Option Selector", "someradiooptionselector", "radio")
                .help("Choose an option from the list.")
                .options(SAMPLE_OPTIONS),
        ],
        submit_label: "Submit".to_owned(),
        notify_on_cancel: true,
        state: DIALOG_STATE_SOME.to_owned(),
    }
}

pub fn dialog_without_elements(state: &str) -> Dialog {
    Dialog {
        callback_id: "somecallbackid".to_owned(),
        title: "Sample Confirmation Dialog".to_owned(),
        icon_url: DIALOG_ICON_URL.to_owned(),
        submit_label: "Confirm".to_owned(),
        notify_on_cancel: true,
        state: state.to_owned(),
        ..Dialog::default()
    }
}

pub fn dialog_with_introduction_text(introduction_text: &str) -> Dialog {
    Dialog { introduction_text: introduction_text.to_owned(), ..dialog_with_sample_elements() }
}
