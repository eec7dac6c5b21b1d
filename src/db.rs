//! SQLite mirror of the attribute schema and value store.
//!
//! An [crate::inventory::Inventory] built with an event sender emits an [InventoryEvent] for every
//! committed write. Staging those events in a [Transaction] and executing it keeps the mirror in
//! step, after which [DbConnection::set_query] evaluates set queries in SQL.
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    sqlite::{Sqlite, SqliteConnectOptions},
    ConnectOptions, Execute, Pool, QueryBuilder, Row,
};
use std::{collections::BTreeSet, path::PathBuf, result::Result, str::FromStr};

use crate::{
    attribute::AttributeDefinition,
    error::NsotError,
    event::InventoryEvent,
    properties::{AttrValue, AttributeId, AttributeMap, ResourceId, ResourceType, SiteId},
    query::{empty_query, not_unique, unknown_attribute, AsSql, SetQuery},
    value::ValueRow,
};

pub const NSOT_DB: &str = "nsot.db";

pub struct Transaction<'a> {
    qb: QueryBuilder<'a, Sqlite>,
    pub staged: usize,
}

impl<'a> Default for Transaction<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Transaction<'a> {
    pub fn new() -> Transaction<'a> {
        Transaction {
            qb: QueryBuilder::<Sqlite>::new(""),
            staged: 0,
        }
    }

    pub async fn execute(&mut self, connection: &Pool<Sqlite>) -> Result<(), NsotError> {
        if self.staged == 0 {
            return Ok(());
        }
        let query = self.qb.build();
        tracing::debug!("Executing SQL for {} events", self.staged);
        query.execute(connection).await?;
        self.qb.reset();
        self.staged = 0;
        Ok(())
    }

    pub fn add_event(&mut self, event: &InventoryEvent) {
        match event {
            InventoryEvent::AttributeUpdate(attr, depends_on, _) => {
                self.update_attribute(attr, depends_on);
            }
            InventoryEvent::AttributeRemoved(id, _) => {
                self.remove_attribute(*id);
            }
            InventoryEvent::ValuesReplaced(resource_type, resource_id, _, rows, _) => {
                self.replace_values(*resource_type, *resource_id, rows);
            }
            InventoryEvent::ResourceRemoved(resource_type, resource_id, _) => {
                self.remove_values(*resource_type, *resource_id);
            }
        }
    }

    fn update_attribute(&mut self, attr: &AttributeDefinition, depends_on: &[AttributeId]) {
        self.qb.push(
            "INSERT OR REPLACE INTO attributes \
             (id, site_id, resource_name, name, description, required, display, multi, \
             inheritable, constraints, default_value) ",
        );
        self.qb.push_values(vec![attr], |mut b, attr| {
            b.push_bind(attr.id.0 as i64)
                .push_bind(attr.site_id.0 as i64)
                .push_bind(attr.resource_type.to_string())
                .push_bind(attr.name.clone())
                .push_bind(attr.description.clone())
                .push_bind(attr.required)
                .push_bind(attr.display)
                .push_bind(attr.multi)
                .push_bind(attr.inheritable)
                .push_bind(attr.constraints.to_json().to_string())
                .push_bind(
                    attr.default
                        .as_ref()
                        .and_then(|d| serde_json::to_string(d).ok()),
                );
        });
        self.qb
            .push("; DELETE FROM attribute_dependencies WHERE attribute_id = ");
        self.qb.push_bind(attr.id.0 as i64);
        self.qb.push("; ");
        if !depends_on.is_empty() {
            self.qb
                .push("INSERT INTO attribute_dependencies (attribute_id, depends_on_id) ");
            self.qb.push_values(depends_on.iter(), |mut b, dep| {
                b.push_bind(attr.id.0 as i64).push_bind(dep.0 as i64);
            });
            self.qb.push("; ");
        }
        self.staged += 1;
    }

    fn remove_attribute(&mut self, id: AttributeId) {
        self.qb
            .push("DELETE FROM attribute_dependencies WHERE attribute_id = ");
        self.qb.push_bind(id.0 as i64);
        self.qb.push(" OR depends_on_id = ");
        self.qb.push_bind(id.0 as i64);
        self.qb.push("; DELETE FROM attributes WHERE id = ");
        self.qb.push_bind(id.0 as i64);
        self.qb.push("; ");
        self.staged += 1;
    }

    fn remove_values(&mut self, resource_type: ResourceType, resource_id: ResourceId) {
        self.qb
            .push("DELETE FROM attribute_values WHERE resource_type = ");
        self.qb.push_bind(resource_type.to_string());
        self.qb.push(" AND resource_id = ");
        self.qb.push_bind(resource_id.0 as i64);
        self.qb.push("; ");
        self.staged += 1;
    }

    fn replace_values(
        &mut self,
        resource_type: ResourceType,
        resource_id: ResourceId,
        rows: &[ValueRow],
    ) {
        self.remove_values(resource_type, resource_id);
        if rows.is_empty() {
            return;
        }
        self.qb.push(
            "INSERT INTO attribute_values \
             (id, attribute_id, name, value, resource_type, resource_id, site_id) ",
        );
        self.qb.push_values(rows.iter(), |mut b, row| {
            b.push_bind(row.id.0 as i64)
                .push_bind(row.attribute_id.0 as i64)
                .push_bind(row.name.clone())
                .push_bind(row.value.clone())
                .push_bind(row.resource_type.to_string())
                .push_bind(row.resource_id.0 as i64)
                .push_bind(row.site_id.0 as i64);
        });
        self.qb.push("; ");
    }
}

#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

impl DbConnection {
    /// Evaluate `query` in SQL. Resources without any value rows are never returned.
    ///
    /// Every term must name an attribute mirrored for the query's resource type (and site, when
    /// given). With `unique`, anything other than exactly one result is an error.
    #[tracing::instrument(skip(self))]
    pub async fn set_query(
        &self,
        query: &SetQuery,
        unique: bool,
    ) -> Result<BTreeSet<ResourceId>, NsotError> {
        if query.is_empty() {
            if unique {
                return Err(empty_query(query.resource_type).into());
            }
            return Ok(BTreeSet::new());
        }
        for term in query.terms.iter() {
            term.matcher()?;
            if !self
                .attribute_exists(query.resource_type, &term.name, query.site_id)
                .await?
            {
                return Err(unknown_attribute(&term.name).into());
            }
        }

        let mut qb = QueryBuilder::<Sqlite>::new("");
        query.build_query(true, &mut qb);
        let built = qb.build();
        let sql = built.sql().to_string();
        let rows = built.fetch_all(&self.0).await.map_err(|e| {
            tracing::error!(
                "[DbConnection.set_query] SQL error processing '{}'\n\terror: {}",
                sql,
                e
            );
            e
        })?;
        let found: BTreeSet<ResourceId> = rows
            .into_iter()
            .map(|row| ResourceId(row.get::<i64, usize>(0) as u64))
            .collect();
        if unique && found.len() != 1 {
            return Err(not_unique(found.len()).into());
        }
        Ok(found)
    }

    async fn attribute_exists(
        &self,
        resource_type: ResourceType,
        name: &str,
        site_id: Option<SiteId>,
    ) -> Result<bool, NsotError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM attributes WHERE resource_name = ",
        );
        qb.push_bind(resource_type.to_string());
        qb.push(" AND name = ");
        qb.push_bind(name.to_string());
        if let Some(site) = site_id {
            qb.push(" AND site_id = ");
            qb.push_bind(site.0 as i64);
        }
        let count: i64 = qb.build_query_scalar().fetch_one(&self.0).await?;
        Ok(count > 0)
    }

    /// Rebuild the attribute map of a resource from the mirrored rows.
    pub async fn get_attributes(
        &self,
        resource_type: ResourceType,
        resource_id: ResourceId,
    ) -> Result<AttributeMap, NsotError> {
        let rows = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT v.name, v.value, a.multi FROM attribute_values v \
             JOIN attributes a ON a.id = v.attribute_id \
             WHERE v.resource_type = ? AND v.resource_id = ? ORDER BY v.id",
        )
        .bind(resource_type.to_string())
        .bind(resource_id.0 as i64)
        .fetch_all(&self.0)
        .await?;

        let mut attrs = AttributeMap::new();
        for (name, value, multi) in rows {
            if multi {
                if let AttrValue::Multi(list) = attrs
                    .entry(name)
                    .or_insert_with(|| AttrValue::Multi(Vec::new()))
                {
                    list.push(value);
                }
            } else {
                attrs.insert(name, AttrValue::Single(value));
            }
        }
        Ok(attrs)
    }

    pub async fn count_values(&self, site_id: Option<SiteId>) -> Result<u64, NsotError> {
        let count: i64 = match site_id {
            Some(site) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM attribute_values WHERE site_id = ?")
                    .bind(site.0 as i64)
                    .fetch_one(&self.0)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM attribute_values")
                    .fetch_one(&self.0)
                    .await?
            }
        };
        Ok(count as u64)
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![Migration {
        version: 1,
        description: "create_attribute_tables",
        sql: "\
            CREATE TABLE attributes (id INTEGER PRIMARY KEY, site_id INTEGER NOT NULL, \
                resource_name TEXT NOT NULL, name TEXT NOT NULL, description TEXT, \
                required INTEGER NOT NULL, display INTEGER NOT NULL, multi INTEGER NOT NULL, \
                inheritable INTEGER NOT NULL, constraints TEXT, default_value TEXT, \
                UNIQUE(site_id, resource_name, name)); \
            CREATE TABLE attribute_dependencies (attribute_id INTEGER NOT NULL, \
                depends_on_id INTEGER NOT NULL, UNIQUE(attribute_id, depends_on_id)); \
            CREATE TABLE attribute_values (id INTEGER PRIMARY KEY, attribute_id INTEGER NOT NULL, \
                name TEXT NOT NULL, value TEXT NOT NULL, resource_type TEXT NOT NULL, \
                resource_id INTEGER NOT NULL, site_id INTEGER NOT NULL, \
                UNIQUE(name, value, resource_type, resource_id)); \
            CREATE INDEX attribute_values_resource ON attribute_values (resource_type, resource_id);",
        kind: MigrationType::ReversibleUp,
    }])
}

/// Open (creating if needed) the database at `db_path` and bring its schema up to date.
pub async fn db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, NsotError> {
    let path = db_path.to_str().ok_or_else(|| {
        NsotError::Custom(format!("Database path {db_path:?} is not valid UTF-8"))
    })?;
    let fqdb = format!("sqlite:{path}");
    tracing::debug!("Initializing attribute db from file: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .disable_statement_logging()
        .with_regexp()
        .create_if_missing(true);

    let pool = Pool::<Sqlite>::connect_with(options).await?;
    let migrator = Migrator::new(migrations()).await.map_err(sqlx::Error::from)?;
    migrator.run(&pool).await.map_err(sqlx::Error::from)?;

    let attr_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attributes;")
        .fetch_one(&pool)
        .await?;
    let value_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attribute_values;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tAttribute count:\t{} \n \
         \tValue count:\t{}",
        attr_count,
        value_count
    );

    Ok(pool)
}
