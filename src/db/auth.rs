use std::{collections::HashMap, fmt::Display};

use mongodb::bson::{doc, Bson, Document, Uuid};
use serde::{Deserialize, Serialize};

use crate::{
    db::mongo::USERS_COL,
    error_result::{AuthError, Error},
};
use crate::{error_result::Result, server::AppPrivateRoute};

use super::mongo::DbClient;

pub async fn check_is_username_occupied(db: &DbClient, username: &str) -> Result<bool> {
    let filter = doc! {"username":username};
    let res = db
        .bo_db
        .collection::<User>(USERS_COL)
        .find_one(filter, None)
        .await?;
    Ok(res.is_some())
}

pub async fn create_user(db: &DbClient, user: User) -> Result<()> {
    let mut sub_role_doc = Document::new();
    for (path, role) in user.sub_role.iter() {
        sub_role_doc.insert(path.to_string(), role);
    }
    let doc = doc! {
        "id":user.id,
        "username":user.username,
        "hash":user.hash,
        "role":user.role,
        "sub_role":sub_role_doc,
    };
    db.bo_db.collection(USERS_COL).insert_one(doc, None).await?;
    Ok(())
}

pub async fn find_user(db: &DbClient, id: Uuid) -> Result<User> {
    let filter = doc! {"id":id};
    db.bo_db
        .collection::<User>(USERS_COL)
        .find_one(filter, None)
        .await?
        .ok_or(Error::Auth(AuthError::UserNotFound))
}

pub async fn find_user_by_username(db: &DbClient, username: &str) -> Result<User> {
    let filter = doc! {"username":username};
    db.bo_db
        .collection::<User>(USERS_COL)
        .find_one(filter, None)
        .await?
        .ok_or(Error::Auth(AuthError::UserNotFound))
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub hash: String,
    pub role: UserRole,
    pub sub_role: HashMap<AppPrivateRoute, UserRole>,
}

impl User {
    pub fn new(
        username: String,
        hash: String,
        role: UserRole,
        sub_role: HashMap<AppPrivateRoute, UserRole>,
    ) -> Self {
        Self {
            id: Uuid::new(),
            username,
            hash,
            role,
            sub_role,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, PartialOrd, Eq, Ord, Copy)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Full = 0,
    Editor = 1,
    Viewer = 2,
    Visitor = 3,
}

impl Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Editor => write!(f, "editor"),
            Self::Viewer => write!(f, "viewer"),
            Self::Visitor => write!(f, "visitor"),
        }
    }
}

impl From<UserRole> for Bson {
    fn from(u: UserRole) -> Self {
        Bson::String(u.to_string())
    }
}

/// the strongest of the global role and the role granted on `route`.
pub fn effective_role(
    role: UserRole,
    sub_role: &HashMap<AppPrivateRoute, UserRole>,
    route: &AppPrivateRoute,
) -> UserRole {
    match sub_role.get(route) {
        Some(granted) => role.min(*granted),
        None => role,
    }
}

/// who performs a workflow transition, with the role effective on the route being used.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            id: Uuid::from_bytes([0; 16]),
            username: String::from("system"),
            role: UserRole::Full,
        }
    }

    pub fn is_manager(&self) -> bool {
        self.role == UserRole::Full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_role_is_more_privileged() {
        assert!(UserRole::Full < UserRole::Editor);
        assert!(UserRole::Editor < UserRole::Viewer);
        assert!(UserRole::Viewer < UserRole::Visitor);
    }

    #[test]
    fn sub_role_can_only_raise_privilege() {
        let sub_role = HashMap::from([
            (AppPrivateRoute::Receipts, UserRole::Full),
            (AppPrivateRoute::Handovers, UserRole::Visitor),
        ]);
        assert_eq!(
            effective_role(UserRole::Editor, &sub_role, &AppPrivateRoute::Receipts),
            UserRole::Full
        );
        assert_eq!(
            effective_role(UserRole::Editor, &sub_role, &AppPrivateRoute::Handovers),
            UserRole::Editor
        );
        assert_eq!(
            effective_role(UserRole::Viewer, &sub_role, &AppPrivateRoute::Orders),
            UserRole::Viewer
        );
    }

    #[test]
    fn system_actor_is_a_manager() {
        let system = Actor::system();
        assert!(system.is_manager());
        assert_eq!(system.username, "system");
    }
}
