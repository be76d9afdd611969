use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Verb selected by the trailing `@@<action>` URL segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    View,
    Edit,
    Add,
    Remove,
    List,
    Chooser,
    Settings,
    Login,
    Logout,
    RequestPasswordToken,
    ChangePassword,
}

impl Action {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "view" => Action::View,
            "edit" => Action::Edit,
            "add" => Action::Add,
            "remove" => Action::Remove,
            "list" => Action::List,
            "chooser" => Action::Chooser,
            "settings" => Action::Settings,
            "login" => Action::Login,
            "logout" => Action::Logout,
            "request-password-token" => Action::RequestPasswordToken,
            "change-password" => Action::ChangePassword,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Edit => "edit",
            Action::Add => "add",
            Action::Remove => "remove",
            Action::List => "list",
            Action::Chooser => "chooser",
            Action::Settings => "settings",
            Action::Login => "login",
            Action::Logout => "logout",
            Action::RequestPasswordToken => "request-password-token",
            Action::ChangePassword => "change-password",
        }
    }

    /// Actions only authenticated users may perform.
    pub fn requires_auth(self) -> bool {
        matches!(
            self,
            Action::Add
                | Action::Edit
                | Action::Remove
                | Action::List
                | Action::Chooser
                | Action::Settings
                | Action::Logout
        )
    }
}

/// Snapshot of an in-flight HTTP request, served to modules by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub id: u64,
    pub site: String,
    pub node_path: String,
    pub action: Action,
    pub method: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub form: BTreeMap<String, String>,
    pub login: Option<String>,
    pub locale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_gate_covers_mutating_actions() {
        let cases = [
            (Action::Login, false),
            (Action::View, false),
            (Action::RequestPasswordToken, false),
            (Action::ChangePassword, false),
            (Action::Logout, true),
            (Action::Edit, true),
            (Action::Add, true),
            (Action::Remove, true),
            (Action::List, true),
            (Action::Chooser, true),
            (Action::Settings, true),
        ];
        for (action, auth) in cases {
            assert_eq!(action.requires_auth(), auth, "{action:?}");
            assert_eq!(Action::from_name(action.name()), Some(action));
        }
        assert_eq!(Action::from_name("destroy"), None);
    }
}
