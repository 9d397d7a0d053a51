//! The reference server's bootstrap schema: a small blog-shaped content
//! model (`posts`, `media`, `users` collections; a `siteSettings` global)
//! used to exercise every engine capability end to end. A real embedder
//! supplies its own collections instead of this module.

use headway_core::{
    AccessDecision, AccessRule, CollectionOptions, CollectionSchema, FieldDef, FieldType,
    GlobalSchema, IndexSpec, RelationKind, Schema, WorkflowConfig,
};

fn authenticated_write() -> AccessRule {
    AccessRule::dynamic(|ctx| {
        Ok(if ctx.session.is_some() {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny
        })
    })
}

fn posts() -> CollectionSchema {
    let mut posts = CollectionSchema::new(
        "posts",
        vec![
            FieldDef::new("title", FieldType::Text).required().localized(),
            FieldDef::new("slug", FieldType::Text).required(),
            FieldDef::new("excerpt", FieldType::Textarea).localized(),
            FieldDef::new("body", FieldType::RichText).localized(),
            FieldDef::new("coverImage", FieldType::Upload),
            FieldDef::relation("author", RelationKind::BelongsTo, "users"),
        ],
    );
    posts.options = CollectionOptions {
        timestamps: true,
        soft_delete: true,
        versioning: true,
        workflow: Some(WorkflowConfig {
            stages: vec!["draft".into(), "published".into(), "archived".into()],
            initial_stage: "draft".into(),
            transitions: [
                ("draft".to_string(), vec!["published".to_string()]),
                ("published".to_string(), vec!["archived".to_string(), "draft".to_string()]),
                ("archived".to_string(), vec!["draft".to_string()]),
            ]
            .into_iter()
            .collect(),
        }),
    };
    posts.indexes = vec![IndexSpec {
        columns: vec!["slug".to_string()],
        unique: true,
    }];
    posts.access.create = authenticated_write();
    posts.access.update = authenticated_write();
    posts.access.delete = authenticated_write();
    posts
}

fn media() -> CollectionSchema {
    let mut media = CollectionSchema::new(
        "media",
        vec![
            FieldDef::new("filename", FieldType::Text).required(),
            FieldDef::new("url", FieldType::Url).required(),
            FieldDef::new("contentType", FieldType::Text).required(),
            FieldDef::new("size", FieldType::Number),
            FieldDef::new("alt", FieldType::Text),
        ],
    );
    media.access.create = authenticated_write();
    media.access.delete = authenticated_write();
    media
}

fn users() -> CollectionSchema {
    let mut users = CollectionSchema::new(
        "users",
        vec![
            FieldDef::new("email", FieldType::Email).required(),
            FieldDef::new("name", FieldType::Text).required(),
            {
                let mut role = FieldDef::new("role", FieldType::Select).required();
                role.config.options = Some(vec!["admin".into(), "editor".into(), "viewer".into()]);
                role.config.default = Some(serde_json::json!("viewer"));
                role
            },
        ],
    );
    users.indexes = vec![IndexSpec {
        columns: vec!["email".to_string()],
        unique: true,
    }];
    users.access.create = AccessRule::Deny;
    users.access.update = authenticated_write();
    users.access.delete = AccessRule::Deny;
    users
}

fn site_settings() -> GlobalSchema {
    GlobalSchema::new(
        "siteSettings",
        vec![
            FieldDef::new("title", FieldType::Text).required(),
            FieldDef::new("description", FieldType::Textarea),
            FieldDef::new("contactEmail", FieldType::Email),
        ],
    )
}

pub fn bootstrap() -> headway_core::Result<Schema> {
    let mut schema = Schema::new();
    schema.add_collection(users())?;
    schema.add_collection(media())?;
    schema.add_collection(posts())?;
    schema.add_global(site_settings())?;
    Ok(schema)
}
