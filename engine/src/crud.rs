//! The CRUD engine: `create`, `findOne`, `find`,
//! `updateById`, `updateMany`, `deleteById`, `deleteMany`, `restore`,
//! `findVersions`, `revertToVersion`, `transitionStage`.
//!
//! Operates purely in terms of the abstract `Db` contract: it assembles
//! parameterised SQL itself from the compiled `CollectionSchema` and
//! leaves execution to whatever `Db` implementation the caller supplied.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::access::{AccessDecision, AccessRule};
use crate::context::{AppContext, TxId};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::field::FieldDef;
use crate::hooks::{GlobalHooks, HookContext, OperationKind, TransitionContext};
use crate::job::Queue;
use crate::localization;
use crate::query::{compile_order_by, compile_where, CompiledWhere, FieldResolver, Pagination, Where};
use crate::realtime::{RealtimeLogEntry, ResourceType};
use crate::record::{FindResult, Record, VersionOperation, VersionRecord};
use crate::schema::{CollectionSchema, Schema};

pub struct FindOptions {
    pub where_: Option<Where>,
    pub order_by: Vec<crate::query::OrderBy>,
    pub pagination: Pagination,
    pub stage: Option<String>,
    pub include_deleted: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            where_: None,
            order_by: Vec::new(),
            pagination: Pagination { limit: None, offset: None },
            stage: None,
            include_deleted: false,
        }
    }
}

pub struct CrudEngine {
    pub schema: Arc<Schema>,
    pub db: Arc<dyn Db>,
    pub global_hooks: Arc<GlobalHooks>,
    pub queue: Option<Arc<dyn Queue>>,
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl CrudEngine {
    fn hook_ctx(&self, collection: &str, operation: OperationKind, ctx: &AppContext) -> HookContext {
        HookContext {
            collection: collection.to_string(),
            operation,
            locale: ctx.locale.clone(),
            session_user_id: ctx.session.as_ref().and_then(|s| s.user_id.clone()),
        }
    }

    async fn ensure_transaction(&self, ctx: &AppContext) -> Result<(TxId, bool)> {
        if let Some(id) = ctx.transaction.id {
            Ok((id, false))
        } else {
            let id = self.db.begin().await?;
            Ok((id, true))
        }
    }

    async fn finish_transaction(&self, ctx: &AppContext, tx: TxId, opened_here: bool) -> Result<()> {
        if opened_here {
            self.db.commit(tx).await?;
        }
        // Run afterCommit callbacks once the outermost call finishes,
        // whether or not this call itself opened the transaction.
        if opened_here {
            ctx.transaction.run_after_commit().await;
        }
        Ok(())
    }

    async fn evaluate_access(&self, rule: &AccessRule, ctx: &AppContext) -> Result<Option<Where>> {
        match rule.evaluate(ctx)? {
            AccessDecision::Allow => Ok(None),
            AccessDecision::Deny => Err(Error::Forbidden),
            AccessDecision::Restrict(w) => Ok(Some(w)),
        }
    }

    /// Guard a single-row write (update/delete/transition). `Allow` and
    /// `Deny` behave as they do for reads; `Restrict(where)` must be
    /// checked against the exact row being mutated, since there's no query
    /// to AND it into the way there is for `find`.
    async fn check_write_access(
        &self,
        rule: &AccessRule,
        schema: &CollectionSchema,
        id: &str,
        ctx: &AppContext,
    ) -> Result<()> {
        match rule.evaluate(ctx)? {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny => Err(Error::Forbidden),
            AccessDecision::Restrict(where_) => {
                let resolver = self.resolver(schema, false);
                let compiled = compile_where(&resolver, &where_, 2)?;
                let sql = format!(
                    "SELECT 1 as present FROM {t} t WHERE t.\"id\" = $1 AND ({}) LIMIT 1",
                    compiled.sql,
                    t = quote_ident(&schema.name),
                );
                let mut params = vec![Value::String(id.to_string())];
                params.extend(compiled.params);
                let row = self.db.query_one(ctx.transaction.id, &sql, &params).await?;
                if row.is_none() {
                    return Err(Error::Forbidden);
                }
                Ok(())
            }
        }
    }

    fn resolver<'a>(&self, schema: &'a CollectionSchema, fallback: bool) -> FieldResolver<'a> {
        FieldResolver {
            schema,
            main_alias: "t",
            i18n_alias: "ti",
            i18n_fallback_alias: if fallback { Some("tif") } else { None },
        }
    }

    // -- create --------------------------------------------------------

    pub async fn create(&self, collection: &str, payload: Value, ctx: &AppContext) -> Result<Record> {
        let schema = self.schema.collection(collection)?;
        if matches!(schema.access.create.evaluate(ctx)?, AccessDecision::Deny) {
            return Err(Error::Forbidden);
        }

        let (tx, opened_here) = self.ensure_transaction(ctx).await?;
        let op_ctx = ctx.with_transaction(tx);

        let mut payload = payload;
        let obj = payload
            .as_object_mut()
            .ok_or_else(|| Error::BadRequest("payload must be a JSON object".to_string()))?;
        schema.normalize_relation_names(obj);

        let hctx = self.hook_ctx(collection, OperationKind::Create, &op_ctx);
        for hook in &schema.hooks.before_change {
            payload = hook(payload, hctx.clone()).await?;
        }
        for hook in self.global_hooks.before_change_for(collection) {
            payload = hook(payload, hctx.clone()).await?;
        }
        for hook in &schema.hooks.validate {
            hook(payload.clone(), hctx.clone()).await?;
        }

        schema.validate_payload(&payload, false)?;

        let loc_schema = schema.localization_schema();
        let (structure, i18n_values) = split_payload(&payload, &loc_schema);

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        self.insert_main_row(schema, tx, &id, &structure, now).await?;
        if schema.has_i18n() {
            self.upsert_i18n_row(schema, tx, &id, &op_ctx.locale, &i18n_values)
                .await?;
        }

        let mut version_number = 0i64;
        if schema.options.versioning {
            version_number = 1;
            self.insert_version_row(
                schema,
                tx,
                &id,
                version_number,
                VersionOperation::Create,
                &op_ctx,
                &structure,
                &i18n_values,
                None,
            )
            .await?;
        }

        self.append_realtime_log(
            tx,
            ResourceType::Collection,
            collection,
            "create",
            Some(&id),
            Some(&op_ctx.locale),
            serde_json::json!({ "changed": payload.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>()) }),
        )
        .await?;

        let merged = localization::merge(&structure, Some(&i18n_values), None, &wrap_object(&loc_schema));
        let record = Record {
            id: id.clone(),
            collection: collection.to_string(),
            data: merged.clone(),
            created_at: Some(now),
            updated_at: Some(now),
            deleted_at: None,
        };

        for hook in &schema.hooks.after_change {
            hook(merged.clone(), hctx.clone()).await?;
        }
        for hook in self.global_hooks.after_change_for(collection) {
            hook(merged.clone(), hctx.clone()).await?;
        }

        let _ = version_number;
        self.finish_transaction(&op_ctx, tx, opened_here).await?;
        Ok(record)
    }

    // -- find / findOne --------------------------------------------------

    pub async fn find_one(&self, collection: &str, opts: FindOptions, ctx: &AppContext) -> Result<Option<Record>> {
        let mut result = self.find(collection, FindOptions { pagination: Pagination { limit: Some(1), offset: None }, ..opts }, ctx).await?;
        Ok(result.docs.pop())
    }

    pub async fn find(&self, collection: &str, opts: FindOptions, ctx: &AppContext) -> Result<FindResult> {
        let schema = self.schema.collection(collection)?;
        let access_where = self.evaluate_access(&schema.access.read, ctx).await?;

        if let Some(stage) = &opts.stage {
            let is_initial_stage = schema
                .options
                .workflow
                .as_ref()
                .is_some_and(|w| &w.initial_stage == stage);
            // Draft/initial-stage content is never version-tagged, it only
            // ever lives in the main table. Only non-initial stages are
            // actually served out of the versions table.
            if !is_initial_stage {
                return self.find_versions_by_stage(schema, stage, opts, access_where, ctx).await;
            }
        }

        let resolver = self.resolver(schema, ctx.locale_fallback);
        let mut idx = 1usize;
        let mut params: Vec<Value> = Vec::new();

        let locale_idx = idx;
        idx += 1;
        params.push(Value::String(ctx.locale.clone()));
        let fallback_idx = if ctx.locale_fallback {
            let i = idx;
            idx += 1;
            params.push(Value::String(ctx.default_locale.clone()));
            Some(i)
        } else {
            None
        };
        let joins = self.join_clause(schema, locale_idx, fallback_idx);

        let mut where_sql = String::from("TRUE");
        if let Some(w) = &opts.where_ {
            let compiled = compile_where(&resolver, w, idx)?;
            idx += compiled.params.len();
            where_sql = compiled.sql;
            params.extend(compiled.params);
        }
        if let Some(access) = &access_where {
            let compiled = compile_where(&resolver, access, idx)?;
            idx += compiled.params.len();
            where_sql = format!("({where_sql}) AND ({})", compiled.sql);
            params.extend(compiled.params);
        }
        if schema.options.soft_delete && !opts.include_deleted {
            where_sql = format!("({where_sql}) AND t.\"deletedAt\" IS NULL");
        }

        let order_sql = compile_order_by(&resolver, &opts.order_by)?;

        let mut select_cols = "t.*".to_string();
        if schema.has_i18n() {
            select_cols.push_str(", to_jsonb(ti.*) - 'parentId' - 'locale' as \"__i18n_current\"");
            if fallback_idx.is_some() {
                select_cols.push_str(", to_jsonb(tif.*) - 'parentId' - 'locale' as \"__i18n_fallback\"");
            }
        }
        let mut sql = format!(
            "SELECT {select_cols} FROM {table} t {joins} WHERE {where_sql} ORDER BY {order_sql}",
            table = quote_ident(&schema.name),
        );
        if let Some(limit) = opts.pagination.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = opts.pagination.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let tx = ctx.transaction.id;
        let rows = self.db.query(tx, &sql, &params).await?;

        let count_sql = format!(
            "SELECT COUNT(*) as count FROM {table} t {joins} WHERE {where_sql}",
            table = quote_ident(&schema.name),
        );
        let total = self
            .db
            .query_one(tx, &count_sql, &params)
            .await?
            .and_then(|r| r.get("count").and_then(Value::as_i64))
            .unwrap_or(rows.len() as i64);

        let loc_schema = schema.localization_schema();
        let docs = rows
            .into_iter()
            .map(|row| self.row_to_record(schema, row, &loc_schema, &ctx.locale, ctx.locale_fallback))
            .collect::<Result<Vec<_>>>()?;

        Ok(FindResult { docs, total })
    }

    fn join_clause(&self, schema: &CollectionSchema, locale_idx: usize, fallback_idx: Option<usize>) -> String {
        if !schema.has_i18n() {
            return String::new();
        }
        let table = format!("{}_i18n", schema.name);
        let mut sql = format!(
            "LEFT JOIN {t} ti ON ti.\"parentId\" = t.\"id\" AND ti.\"locale\" = ${locale_idx}",
            t = quote_ident(&table)
        );
        if let Some(fallback_idx) = fallback_idx {
            sql.push_str(&format!(
                " LEFT JOIN {t} tif ON tif.\"parentId\" = t.\"id\" AND tif.\"locale\" = ${fallback_idx}",
                t = quote_ident(&table)
            ));
        }
        sql
    }

    async fn find_versions_by_stage(
        &self,
        schema: &CollectionSchema,
        stage: &str,
        opts: FindOptions,
        access_where: Option<Where>,
        ctx: &AppContext,
    ) -> Result<FindResult> {
        let _ = (opts, access_where);
        let table = format!("{}_versions", schema.name);
        let sql = format!(
            "SELECT DISTINCT ON (\"recordId\") * FROM {t} WHERE \"versionStage\" = $1 ORDER BY \"recordId\", \"versionNumber\" DESC",
            t = quote_ident(&table)
        );
        let rows = self.db.query(ctx.transaction.id, &sql, &[Value::String(stage.to_string())]).await?;
        let loc_schema = schema.localization_schema();
        let docs = rows
            .into_iter()
            .map(|row| self.row_to_record(schema, row, &loc_schema, &ctx.locale, ctx.locale_fallback))
            .collect::<Result<Vec<_>>>()?;
        let total = docs.len() as i64;
        Ok(FindResult { docs, total })
    }

    fn row_to_record(
        &self,
        schema: &CollectionSchema,
        row: crate::db::Row,
        loc_schema: &BTreeMap<String, crate::localization::LocSchema>,
        locale: &str,
        fallback: bool,
    ) -> Result<Record> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal("row missing id column".to_string()))?
            .to_string();
        let current_i18n = row.get("__i18n_current").cloned();
        let fallback_i18n = if fallback { row.get("__i18n_fallback").cloned() } else { None };

        // `main_columns` excludes top-level localized leaves entirely, so the
        // raw row never carries a key for them. `merge`'s Object branch walks
        // `structure`'s keys, so without this the i18n sidecar value for those
        // fields would never surface. Backfill the same `$i18n` sentinel
        // `split` would have produced for each one.
        let mut structure = row.clone();
        for (key, child_schema) in loc_schema {
            if matches!(child_schema, crate::localization::LocSchema::Leaf) && !structure.contains_key(key) {
                structure.insert(key.clone(), serde_json::json!({ "$i18n": true }));
            }
        }
        let structure = Value::Object(structure);
        let merged = localization::merge(&structure, current_i18n.as_ref(), fallback_i18n.as_ref(), &wrap_object(loc_schema));

        let created_at = row.get("createdAt").and_then(Value::as_str).and_then(|s| s.parse().ok());
        let updated_at = row.get("updatedAt").and_then(Value::as_str).and_then(|s| s.parse().ok());
        let deleted_at = row.get("deletedAt").and_then(Value::as_str).and_then(|s| s.parse().ok());
        let _ = locale;

        Ok(Record {
            id,
            collection: schema.name.clone(),
            data: merged,
            created_at,
            updated_at,
            deleted_at,
        })
    }

    // -- updateById / updateMany -----------------------------------------

    pub async fn update_by_id(&self, collection: &str, id: &str, data: Value, ctx: &AppContext) -> Result<Record> {
        let schema = self.schema.collection(collection)?;
        self.check_write_access(&schema.access.update, schema, id, ctx).await?;

        let (tx, opened_here) = self.ensure_transaction(ctx).await?;
        let op_ctx = ctx.with_transaction(tx);

        let mut data = data;
        let obj = data
            .as_object_mut()
            .ok_or_else(|| Error::BadRequest("payload must be a JSON object".to_string()))?;
        schema.normalize_relation_names(obj);

        let hctx = self.hook_ctx(collection, OperationKind::Update, &op_ctx);
        for hook in &schema.hooks.before_change {
            data = hook(data, hctx.clone()).await?;
        }
        for hook in self.global_hooks.before_change_for(collection) {
            data = hook(data, hctx.clone()).await?;
        }

        schema.validate_payload(&data, true)?;

        let loc_schema = schema.localization_schema();
        let (structure_patch, i18n_patch) = split_payload(&data, &loc_schema);

        self.update_main_row(schema, tx, id, &structure_patch).await?;
        if schema.has_i18n() && !is_empty_object(&i18n_patch) {
            self.upsert_i18n_row(schema, tx, id, &op_ctx.locale, &i18n_patch).await?;
        }

        if schema.options.versioning {
            let next = self.next_version_number(schema, tx, id).await?;
            let current = self
                .find_one(
                    collection,
                    FindOptions {
                        where_: Some(id_where(id)),
                        ..FindOptions::default()
                    },
                    &op_ctx,
                )
                .await?
                .ok_or_else(|| Error::RecordNotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            self.insert_version_row(
                schema,
                tx,
                id,
                next,
                VersionOperation::Update,
                &op_ctx,
                &current.data,
                &i18n_patch,
                None,
            )
            .await?;
        }

        self.append_realtime_log(
            tx,
            ResourceType::Collection,
            collection,
            "update",
            Some(id),
            Some(&op_ctx.locale),
            serde_json::json!({ "changed": data.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>()) }),
        )
        .await?;

        let record = self
            .find_one(
                collection,
                FindOptions {
                    where_: Some(id_where(id)),
                    ..FindOptions::default()
                },
                &op_ctx,
            )
            .await?
            .ok_or_else(|| Error::RecordNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        for hook in &schema.hooks.after_change {
            hook(record.data.clone(), hctx.clone()).await?;
        }
        for hook in self.global_hooks.after_change_for(collection) {
            hook(record.data.clone(), hctx.clone()).await?;
        }

        self.finish_transaction(&op_ctx, tx, opened_here).await?;
        Ok(record)
    }

    pub async fn update_many(&self, collection: &str, where_: Where, data: Value, ctx: &AppContext) -> Result<u64> {
        let schema = self.schema.collection(collection)?;
        if matches!(schema.access.update.evaluate(ctx)?, AccessDecision::Deny) {
            return Err(Error::Forbidden);
        }
        let matches = self
            .find(
                collection,
                FindOptions {
                    where_: Some(where_),
                    ..FindOptions::default()
                },
                ctx,
            )
            .await?;
        let mut count = 0u64;
        for doc in matches.docs {
            self.update_by_id(collection, &doc.id, data.clone(), ctx).await?;
            count += 1;
        }
        Ok(count)
    }

    // -- deleteById / deleteMany / restore -------------------------------

    pub async fn delete_by_id(&self, collection: &str, id: &str, ctx: &AppContext) -> Result<()> {
        let schema = self.schema.collection(collection)?;
        self.check_write_access(&schema.access.delete, schema, id, ctx).await?;
        let (tx, opened_here) = self.ensure_transaction(ctx).await?;
        let op_ctx = ctx.with_transaction(tx);
        let hctx = self.hook_ctx(collection, OperationKind::Delete, &op_ctx);

        for hook in &schema.hooks.before_delete {
            hook(hctx.clone()).await?;
        }
        for hook in self.global_hooks.before_delete_for(collection) {
            hook(hctx.clone()).await?;
        }

        if schema.options.soft_delete {
            let sql = format!(
                "UPDATE {t} SET \"deletedAt\" = $1 WHERE \"id\" = $2",
                t = quote_ident(&schema.name)
            );
            self.db
                .execute(Some(tx), &sql, &[Value::String(Utc::now().to_rfc3339()), Value::String(id.to_string())])
                .await?;
        } else {
            let sql = format!("DELETE FROM {t} WHERE \"id\" = $1", t = quote_ident(&schema.name));
            self.db.execute(Some(tx), &sql, &[Value::String(id.to_string())]).await?;
        }

        self.append_realtime_log(
            tx,
            ResourceType::Collection,
            collection,
            "delete",
            Some(id),
            None,
            Value::Null,
        )
        .await?;

        for hook in &schema.hooks.after_delete {
            hook(hctx.clone()).await?;
        }
        for hook in self.global_hooks.after_delete_for(collection) {
            hook(hctx.clone()).await?;
        }

        self.finish_transaction(&op_ctx, tx, opened_here).await?;
        Ok(())
    }

    pub async fn delete_many(&self, collection: &str, where_: Where, ctx: &AppContext) -> Result<u64> {
        let matches = self
            .find(
                collection,
                FindOptions {
                    where_: Some(where_),
                    ..FindOptions::default()
                },
                ctx,
            )
            .await?;
        let mut count = 0u64;
        for doc in matches.docs {
            self.delete_by_id(collection, &doc.id, ctx).await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn restore(&self, collection: &str, id: &str, ctx: &AppContext) -> Result<Record> {
        let schema = self.schema.collection(collection)?;
        if !schema.options.soft_delete {
            return Err(Error::NotRestorable(collection.to_string()));
        }
        let (tx, opened_here) = self.ensure_transaction(ctx).await?;
        let op_ctx = ctx.with_transaction(tx);
        let sql = format!(
            "UPDATE {t} SET \"deletedAt\" = NULL WHERE \"id\" = $1",
            t = quote_ident(&schema.name)
        );
        self.db.execute(Some(tx), &sql, &[Value::String(id.to_string())]).await?;
        self.append_realtime_log(tx, ResourceType::Collection, collection, "restore", Some(id), None, Value::Null)
            .await?;
        let record = self
            .find_one(
                collection,
                FindOptions {
                    where_: Some(id_where(id)),
                    include_deleted: true,
                    ..FindOptions::default()
                },
                &op_ctx,
            )
            .await?
            .ok_or_else(|| Error::RecordNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        self.finish_transaction(&op_ctx, tx, opened_here).await?;
        Ok(record)
    }

    // -- versions ---------------------------------------------------------

    pub async fn find_versions(&self, collection: &str, id: &str, ctx: &AppContext) -> Result<Vec<VersionRecord>> {
        let schema = self.schema.collection(collection)?;
        let table = format!("{}_versions", schema.name);
        let sql = format!(
            "SELECT * FROM {t} WHERE \"recordId\" = $1 ORDER BY \"versionNumber\" ASC",
            t = quote_ident(&table)
        );
        let rows = self.db.query(ctx.transaction.id, &sql, &[Value::String(id.to_string())]).await?;
        rows.into_iter().map(row_to_version).collect()
    }

    pub async fn revert_to_version(&self, collection: &str, id: &str, version_number: i64, ctx: &AppContext) -> Result<Record> {
        let schema = self.schema.collection(collection)?;
        let versions = self.find_versions(collection, id, ctx).await?;
        let target = versions
            .into_iter()
            .find(|v| v.version_number == version_number)
            .ok_or_else(|| Error::RecordNotFound {
                collection: collection.to_string(),
                id: format!("{id}@v{version_number}"),
            })?;
        let payload = version_payload(schema, &target);

        let (tx, opened_here) = self.ensure_transaction(ctx).await?;
        let op_ctx = ctx.with_transaction(tx);
        let record = self.update_by_id(collection, id, payload, &op_ctx).await?;

        if schema.options.versioning {
            let next = self.next_version_number(schema, tx, id).await?;
            self.insert_version_row(
                schema,
                tx,
                id,
                next,
                VersionOperation::Revert,
                &op_ctx,
                &record.data,
                &Value::Object(Map::new()),
                None,
            )
            .await?;
        }
        self.finish_transaction(&op_ctx, tx, opened_here).await?;
        Ok(record)
    }

    // -- transitionStage ---------------------------------------------------

    pub async fn transition_stage(
        &self,
        collection: &str,
        id: &str,
        stage: &str,
        scheduled_at: Option<chrono::DateTime<Utc>>,
        ctx: &AppContext,
    ) -> Result<Record> {
        let schema = self.schema.collection(collection)?;
        let workflow = schema
            .options
            .workflow
            .as_ref()
            .ok_or_else(|| Error::BadRequest(format!("collection '{collection}' has no workflow")))?;

        self.check_write_access(schema.access.transition_rule(), schema, id, ctx).await?;

        if let Some(scheduled) = scheduled_at {
            if scheduled > Utc::now() {
                let queue = self.queue.as_ref().ok_or(Error::SchedulingUnavailable)?;
                queue
                    .publish(
                        "headway.transitionStage",
                        serde_json::json!({ "collection": collection, "id": id, "stage": stage }),
                        crate::job::JobOptions {
                            start_after: Some(scheduled),
                            ..Default::default()
                        },
                    )
                    .await?;
                return self
                    .find_one(collection, FindOptions { where_: Some(id_where(id)), ..FindOptions::default() }, ctx)
                    .await?
                    .ok_or_else(|| Error::RecordNotFound {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
            }
        }

        let (tx, opened_here) = self.ensure_transaction(ctx).await?;
        let op_ctx = ctx.with_transaction(tx);

        let current_stage = self.current_stage(schema, tx, id).await?.unwrap_or_else(|| workflow.initial_stage.clone());
        if !workflow.can_transition(&current_stage, stage) {
            return Err(Error::IllegalTransition {
                from: current_stage,
                to: stage.to_string(),
            });
        }

        let transition_ctx = TransitionContext {
            from_stage: current_stage.clone(),
            to_stage: stage.to_string(),
        };
        let hctx = self.hook_ctx(collection, OperationKind::Transition, &op_ctx);
        for hook in &schema.hooks.before_transition {
            hook(transition_ctx.clone(), hctx.clone()).await?;
        }

        let current = self
            .find_one(collection, FindOptions { where_: Some(id_where(id)), ..FindOptions::default() }, &op_ctx)
            .await?
            .ok_or_else(|| Error::RecordNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        let next = self.next_version_number(schema, tx, id).await?;
        self.insert_version_row(
            schema,
            tx,
            id,
            next,
            VersionOperation::Transition,
            &op_ctx,
            &current.data,
            &Value::Object(Map::new()),
            Some(stage),
        )
        .await?;

        self.append_realtime_log(
            tx,
            ResourceType::Collection,
            collection,
            "transition",
            Some(id),
            None,
            serde_json::json!({ "fromStage": current_stage, "toStage": stage }),
        )
        .await?;

        for hook in &schema.hooks.after_transition {
            hook(transition_ctx.clone(), hctx.clone()).await?;
        }

        self.finish_transaction(&op_ctx, tx, opened_here).await?;
        Ok(current)
    }

    async fn current_stage(&self, schema: &CollectionSchema, tx: TxId, id: &str) -> Result<Option<String>> {
        let table = format!("{}_versions", schema.name);
        let sql = format!(
            "SELECT \"versionStage\" FROM {t} WHERE \"recordId\" = $1 AND \"versionStage\" IS NOT NULL ORDER BY \"versionNumber\" DESC LIMIT 1",
            t = quote_ident(&table)
        );
        Ok(self
            .db
            .query_one(Some(tx), &sql, &[Value::String(id.to_string())])
            .await?
            .and_then(|r| r.get("versionStage").and_then(Value::as_str).map(str::to_string)))
    }

    // -- low-level row helpers --------------------------------------------

    async fn insert_main_row(&self, schema: &CollectionSchema, tx: TxId, id: &str, structure: &Value, now: chrono::DateTime<Utc>) -> Result<()> {
        let mut columns = vec!["id".to_string()];
        let mut placeholders = vec!["$1".to_string()];
        let mut params = vec![Value::String(id.to_string())];

        if schema.options.timestamps {
            columns.push("createdAt".to_string());
            columns.push("updatedAt".to_string());
            placeholders.push(format!("${}", params.len() + 1));
            placeholders.push(format!("${}", params.len() + 2));
            params.push(Value::String(now.to_rfc3339()));
            params.push(Value::String(now.to_rfc3339()));
        }

        for field in &schema.fields {
            if field.config.localized {
                continue;
            }
            let Some(col) = field.column_name() else { continue };
            if let Some(v) = structure.get(&field.name) {
                columns.push(col);
                placeholders.push(format!("${}", params.len() + 1));
                params.push(v.clone());
            }
        }

        let sql = format!(
            "INSERT INTO {t} ({cols}) VALUES ({ph})",
            t = quote_ident(&schema.name),
            cols = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
            ph = placeholders.join(", "),
        );
        self.db.execute(Some(tx), &sql, &params).await?;
        Ok(())
    }

    async fn update_main_row(&self, schema: &CollectionSchema, tx: TxId, id: &str, patch: &Value) -> Result<()> {
        let mut sets = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        for field in &schema.fields {
            if field.config.localized {
                continue;
            }
            let Some(col) = field.column_name() else { continue };
            if let Some(v) = patch.get(&field.name) {
                params.push(v.clone());
                sets.push(format!("{} = ${}", quote_ident(&col), params.len()));
            }
        }
        if schema.options.timestamps {
            params.push(Value::String(Utc::now().to_rfc3339()));
            sets.push(format!("\"updatedAt\" = ${}", params.len()));
        }
        if sets.is_empty() {
            return Ok(());
        }
        params.push(Value::String(id.to_string()));
        let sql = format!(
            "UPDATE {t} SET {sets} WHERE \"id\" = ${idx}",
            t = quote_ident(&schema.name),
            sets = sets.join(", "),
            idx = params.len(),
        );
        self.db.execute(Some(tx), &sql, &params).await?;
        Ok(())
    }

    async fn upsert_i18n_row(&self, schema: &CollectionSchema, tx: TxId, id: &str, locale: &str, values: &Value) -> Result<()> {
        let table = format!("{}_i18n", schema.name);
        let mut columns = vec!["\"parentId\"".to_string(), "\"locale\"".to_string()];
        let mut params = vec![Value::String(id.to_string()), Value::String(locale.to_string())];

        for field in &schema.fields {
            if !field.config.localized || field.field_type.is_compound() {
                continue;
            }
            if let Some(v) = values.get(&field.name) {
                columns.push(quote_ident(&field.name));
                params.push(v.clone());
            }
        }
        columns.push("\"_localized\"".to_string());
        params.push(values.clone());

        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("${i}")).collect();
        let update_clause: Vec<String> = columns
            .iter()
            .skip(2)
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();

        let sql = format!(
            "INSERT INTO {t} ({cols}) VALUES ({ph}) ON CONFLICT (\"parentId\", \"locale\") DO UPDATE SET {upd}",
            t = quote_ident(&table),
            cols = columns.join(", "),
            ph = placeholders.join(", "),
            upd = update_clause.join(", "),
        );
        self.db.execute(Some(tx), &sql, &params).await?;
        Ok(())
    }

    async fn next_version_number(&self, schema: &CollectionSchema, tx: TxId, id: &str) -> Result<i64> {
        let table = format!("{}_versions", schema.name);
        let sql = format!(
            "SELECT MAX(\"versionNumber\") as max FROM {t} WHERE \"recordId\" = $1",
            t = quote_ident(&table)
        );
        let max = self
            .db
            .query_one(Some(tx), &sql, &[Value::String(id.to_string())])
            .await?
            .and_then(|r| r.get("max").and_then(Value::as_i64));
        Ok(version_after(max))
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_version_row(
        &self,
        schema: &CollectionSchema,
        tx: TxId,
        record_id: &str,
        version_number: i64,
        operation: VersionOperation,
        ctx: &AppContext,
        structure: &Value,
        i18n_values: &Value,
        stage: Option<&str>,
    ) -> Result<()> {
        let table = format!("{}_versions", schema.name);
        let sql = format!(
            "INSERT INTO {t} (\"versionId\", \"recordId\", \"versionNumber\", \"versionOperation\", \"versionUserId\", \"versionCreatedAt\", \"versionStage\", \"data\") VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
            t = quote_ident(&table)
        );
        let version_id = Uuid::new_v4().to_string();
        let user_id = ctx.session.as_ref().and_then(|s| s.user_id.clone());
        let data = serde_json::json!({ "structure": structure, "i18n": i18n_values });
        self.db
            .execute(
                Some(tx),
                &sql,
                &[
                    Value::String(version_id),
                    Value::String(record_id.to_string()),
                    Value::from(version_number),
                    Value::String(format!("{operation:?}").to_lowercase()),
                    user_id.map(Value::String).unwrap_or(Value::Null),
                    Value::String(Utc::now().to_rfc3339()),
                    stage.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null),
                    data,
                ],
            )
            .await?;
        Ok(())
    }

    async fn append_realtime_log(
        &self,
        tx: TxId,
        resource_type: ResourceType,
        resource: &str,
        operation: &str,
        record_id: Option<&str>,
        locale: Option<&str>,
        payload: Value,
    ) -> Result<()> {
        let seq = self.db.next_sequence_value(Some(tx), "realtime_log_seq").await?;
        let entry = RealtimeLogEntry {
            seq,
            resource_type,
            resource: resource.to_string(),
            operation: operation.to_string(),
            record_id: record_id.map(str::to_string),
            locale: locale.map(str::to_string),
            payload,
        };
        let sql = "INSERT INTO \"realtime_log\" (\"seq\", \"resourceType\", \"resource\", \"operation\", \"recordId\", \"locale\", \"payload\") VALUES ($1,$2,$3,$4,$5,$6,$7)";
        self.db
            .execute(
                Some(tx),
                sql,
                &[
                    Value::from(entry.seq),
                    Value::String(format!("{:?}", entry.resource_type).to_lowercase()),
                    Value::String(entry.resource),
                    Value::String(entry.operation),
                    entry.record_id.map(Value::String).unwrap_or(Value::Null),
                    entry.locale.map(Value::String).unwrap_or(Value::Null),
                    entry.payload,
                ],
            )
            .await?;
        Ok(())
    }
}

/// The version number to assign next, given the highest `versionNumber`
/// already stored for a record (`None` when it has no versions yet).
/// Numbers start at 1 and strictly increase with every call.
fn version_after(existing_max: Option<i64>) -> i64 {
    existing_max.unwrap_or(0) + 1
}

fn wrap_object(loc_schema: &BTreeMap<String, crate::localization::LocSchema>) -> crate::localization::LocSchema {
    crate::localization::LocSchema::Object(loc_schema.clone())
}

fn split_payload(payload: &Value, loc_schema: &BTreeMap<String, crate::localization::LocSchema>) -> (Value, Value) {
    localization::split(payload, &wrap_object(loc_schema))
}

/// Reconstitute the flat payload `update_by_id` expects from a version row's
/// stored `{structure, i18n}` snapshot.
fn version_payload(schema: &CollectionSchema, version: &VersionRecord) -> Value {
    let structure = version.data.get("structure").cloned().unwrap_or(Value::Null);
    let i18n = version.data.get("i18n").cloned();
    let loc_schema = schema.localization_schema();
    localization::merge(&structure, i18n.as_ref(), None, &wrap_object(&loc_schema))
}

fn is_empty_object(v: &Value) -> bool {
    matches!(v, Value::Object(m) if m.is_empty())
}

fn id_where(id: &str) -> Where {
    Where::Field(
        [("id".to_string(), crate::query::Predicate::Scalar(Value::String(id.to_string())))]
            .into_iter()
            .collect(),
    )
}

fn row_to_version(row: crate::db::Row) -> Result<VersionRecord> {
    let get_str = |k: &str| row.get(k).and_then(Value::as_str).map(str::to_string);
    let version_number = row.get("versionNumber").and_then(Value::as_i64).unwrap_or_default();
    let operation = match get_str("versionOperation").as_deref() {
        Some("create") => VersionOperation::Create,
        Some("transition") => VersionOperation::Transition,
        Some("revert") => VersionOperation::Revert,
        _ => VersionOperation::Update,
    };
    let created_at = get_str("versionCreatedAt")
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(Utc::now);
    Ok(VersionRecord {
        version_id: get_str("versionId").unwrap_or_default(),
        record_id: get_str("recordId").unwrap_or_default(),
        version_number,
        operation,
        user_id: get_str("versionUserId"),
        created_at,
        stage: get_str("versionStage"),
        data: row.get("data").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::MemoryDb;
    use crate::field::{FieldType, RelationKind};
    use crate::hooks::GlobalHooks;
    use crate::schema::CollectionSchema;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        let mut posts = CollectionSchema::new(
            "posts",
            vec![
                FieldDef::new("title", FieldType::Text).required(),
                FieldDef::new("body", FieldType::Text).localized(),
            ],
        );
        posts.options.versioning = true;
        posts.options.soft_delete = true;
        schema.add_collection(posts).unwrap();
        schema
    }

    fn engine() -> CrudEngine {
        CrudEngine {
            schema: Arc::new(schema()),
            db: Arc::new(MemoryDb::default()),
            global_hooks: Arc::new(GlobalHooks::default()),
            queue: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_missing_required_field() {
        let engine = engine();
        let ctx = AppContext::anonymous("en");
        let err = engine
            .create("posts", serde_json::json!({ "body": "x" }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn create_denied_by_access_rule() {
        let mut schema = schema();
        let mut posts = schema.collections.remove("posts").unwrap();
        posts.access.create = AccessRule::Deny;
        schema.collections.insert("posts".to_string(), posts);
        let engine = CrudEngine {
            schema: Arc::new(schema),
            db: Arc::new(MemoryDb::default()),
            global_hooks: Arc::new(GlobalHooks::default()),
            queue: None,
        };
        let ctx = AppContext::anonymous("en");
        let err = engine
            .create("posts", serde_json::json!({ "title": "Hello" }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Forbidden);
    }

    #[test]
    fn unused_relation_kind_import_compiles() {
        let _ = RelationKind::BelongsTo;
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_version_after_is_strictly_greater_than_existing_max(max in proptest::option::of(0i64..1_000_000)) {
                let next = version_after(max);
                prop_assert!(next > max.unwrap_or(0));
            }

            #[test]
            fn prop_version_numbers_strictly_increase_across_a_sequence(steps in 1usize..50) {
                let mut current: Option<i64> = None;
                for _ in 0..steps {
                    let next = version_after(current);
                    prop_assert!(next > current.unwrap_or(0));
                    current = Some(next);
                }
            }
        }
    }
}
