//! Folder summary store: per-folder table creation, schema
//! migration, and the read/write/delete helpers layered on
//! [`Database`](crate::db::handle::Database).

use sqlx::Row;

use crate::db::handle::{row_get_i64, row_get_string, Database, WriteGuard};
use crate::error::{is_no_such_table, Result, StoreError};
use crate::model::{ColumnIdent, FolderInfoRecord, MessageInfoRecord, PreviewRow, TombstoneRow};

const MESSAGE_INFO_COLUMNS: &[&str] = &[
    "uid",
    "flags",
    "read",
    "deleted",
    "replied",
    "important",
    "junk",
    "attachment",
    "dirty",
    "subject",
    "mail_from",
    "mail_to",
    "mail_cc",
    "mlist",
    "dsent",
    "dreceived",
    "created",
    "modified",
    "part",
    "labels",
    "usertags",
    "cinfo",
    "bdata",
    "size",
    "followup_flag",
    "followup_completed_on",
    "followup_due_by",
];

fn create_table_sql(name: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{name}\" (\
            uid TEXT PRIMARY KEY, flags INTEGER, read INTEGER, deleted INTEGER, \
            replied INTEGER, important INTEGER, junk INTEGER, attachment INTEGER, \
            dirty INTEGER, subject TEXT, mail_from TEXT, mail_to TEXT, mail_cc TEXT, \
            mlist TEXT, dsent INTEGER, dreceived INTEGER, created INTEGER, modified INTEGER, \
            part TEXT, labels TEXT, usertags TEXT, cinfo TEXT, bdata TEXT, size INTEGER, \
            followup_flag TEXT, followup_completed_on INTEGER, followup_due_by INTEGER\
        )"
    )
}

impl Database {
    /// Creates the global `folders` and `Deletes` tables if missing.
    pub async fn create_folders_table(&self) -> Result<()> {
        let mut tx = self.begin_write().await?;
        self.exec(
            "CREATE TABLE IF NOT EXISTS folders (\
                folder_name TEXT PRIMARY KEY, version INTEGER, flags INTEGER, nextuid INTEGER, \
                time INTEGER, saved_count INTEGER, unread_count INTEGER, deleted_count INTEGER, \
                junk_count INTEGER, visible_count INTEGER, jnd_count INTEGER, bdata TEXT)",
        )
        .await?;
        self.exec(
            "CREATE TABLE IF NOT EXISTS Deletes (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, uid TEXT, time INTEGER, mailbox TEXT)",
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn read_schema_version(&self, name: &str) -> Result<i32> {
        let version_table = format!("{name}_version");
        let row = sqlx::query(&format!("SELECT version FROM \"{version_table}\""))
            .fetch_optional(self.pool())
            .await?;
        match row {
            Some(r) => {
                let raw: String = r.try_get::<String, _>(0).unwrap_or_default();
                Ok(raw.parse::<i32>().unwrap_or(2))
            }
            None => Ok(-1),
        }
    }

    async fn write_schema_version(&self, name: &str, version: i32) -> Result<()> {
        let version_table = format!("{name}_version");
        self.exec(&format!("CREATE TABLE IF NOT EXISTS \"{version_table}\" (version TEXT)"))
            .await?;
        self.exec(&format!("DELETE FROM \"{version_table}\"")).await?;
        self.exec(&format!(
            "INSERT INTO \"{version_table}\" (version) VALUES ('{version}')"
        ))
        .await
    }

    /// Runs the migration ladder (-1 -> 0 -> 1 -> 2) and leaves `<name>`
    /// at schema version 2.
    pub async fn prepare_message_info_table(&self, name: &str) -> Result<()> {
        let mut tx = self.begin_write().await?;
        let result = self.prepare_message_info_table_locked(name).await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                let _ = tx.abort().await;
                Err(err)
            }
        }
    }

    async fn prepare_message_info_table_locked(&self, name: &str) -> Result<()> {
        let mut version = self.read_schema_version(name).await?;

        if version == -1 {
            self.exec(&create_table_sql(name)).await?;
            self.exec(&format!(
                "CREATE TABLE IF NOT EXISTS \"{name}_bodystructure\" (uid TEXT PRIMARY KEY, bodystructure TEXT)"
            ))
            .await?;
            self.exec(&format!(
                "CREATE TABLE IF NOT EXISTS \"{name}_preview\" (uid TEXT PRIMARY KEY, preview TEXT)"
            ))
            .await?;
            self.write_schema_version(name, 2).await?;
            self.create_summary_indices(name).await?;
            return Ok(());
        }

        if version < 1 {
            self.migrate_rename_columns(name).await?;
            version = 1;
        }

        if version < 2 {
            version = 2;
        }

        if version > 2 {
            // Refuse files stamped with a schema newer than this build
            // knows how to read rather than silently treat it as current.
            return Err(StoreError::InvalidOperation(format!(
                "{name}_version {version} is newer than this build supports"
            )));
        }

        self.write_schema_version(name, version).await?;
        self.create_summary_indices(name).await?;
        Ok(())
    }

    /// Columns whose name changed at some point in the table's history,
    /// mapped from the current name to the legacy name it carried the value
    /// under. `msg_security` became `dirty`.
    const RENAMED_COLUMNS: &'static [(&'static str, &'static str)] = &[("dirty", "msg_security")];

    /// Copies `<name>` through `mem.<name>` and recreates it with the
    /// current schema (migration stage `v < 1`). The old table's column set
    /// is not known ahead of time (schemas this old predate the current
    /// column list entirely), so the copy-back only carries over columns
    /// present in both (directly, or via [`RENAMED_COLUMNS`](Self::RENAMED_COLUMNS)
    /// for columns the old table still has under a legacy name), leaving
    /// anything new at its default; "no such table" failures during the
    /// copy-back are ignored.
    async fn migrate_rename_columns(&self, name: &str) -> Result<()> {
        let tmp = format!("{name}_migrate");
        let tmp_ref = format!("mem.{tmp}");
        self.exec(&format!("DROP TABLE IF EXISTS {tmp_ref}")).await?;
        self.exec(&format!("CREATE TABLE {tmp_ref} AS SELECT * FROM \"{name}\""))
            .await?;
        self.exec(&format!(
            "UPDATE {tmp_ref} SET created = strftime('%s','now'), modified = strftime('%s','now')"
        ))
        .await?;

        let old_columns: Vec<String> = sqlx::query(&format!("PRAGMA mem.table_info({tmp})"))
            .fetch_all(self.pool())
            .await
            .map(|rows| rows.iter().map(|r| r.try_get::<String, _>("name").unwrap_or_default()).collect())
            .unwrap_or_default();

        self.exec(&format!("DROP TABLE \"{name}\"")).await?;
        self.exec(&create_table_sql(name)).await?;

        let has_column = |wanted: &str| old_columns.iter().any(|oc| oc == wanted);

        let sources: Vec<(&str, &str)> = MESSAGE_INFO_COLUMNS
            .iter()
            .copied()
            .filter_map(|c| {
                if has_column(c) {
                    Some((c, c))
                } else if let Some(&(_, legacy)) = Self::RENAMED_COLUMNS.iter().find(|&&(cur, _)| cur == c) {
                    has_column(legacy).then_some((c, legacy))
                } else {
                    None
                }
            })
            .collect();

        if !sources.is_empty() {
            let cols = sources.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(", ");
            let selects = sources.iter().map(|(_, s)| *s).collect::<Vec<_>>().join(", ");
            let insert_back = format!("INSERT INTO \"{name}\" ({cols}) SELECT {selects} FROM {tmp_ref}");
            if let Err(err) = self.exec(&insert_back).await {
                if !is_no_such_table(&err) {
                    return Err(err);
                }
            }
        }
        self.exec(&format!("DROP TABLE IF EXISTS {tmp_ref}")).await?;
        Ok(())
    }

    async fn create_summary_indices(&self, name: &str) -> Result<()> {
        self.exec(&format!("DROP INDEX IF EXISTS \"SINDEX-{name}\"")).await?;
        self.exec(&format!(
            "CREATE INDEX IF NOT EXISTS \"SINDEX-{name}-preview\" ON \"{name}_preview\" (uid, preview)"
        ))
        .await?;
        self.exec(&format!(
            "CREATE INDEX IF NOT EXISTS \"DELINDEX-{name}\" ON \"{name}\" (deleted)"
        ))
        .await?;
        self.exec(&format!(
            "CREATE INDEX IF NOT EXISTS \"JUNKINDEX-{name}\" ON \"{name}\" (junk)"
        ))
        .await?;
        self.exec(&format!(
            "CREATE INDEX IF NOT EXISTS \"READINDEX-{name}\" ON \"{name}\" (read)"
        ))
        .await
    }

    /// `INSERT OR REPLACE` a message-info record plus its bodystructure,
    /// inside an explicit caller-held savepoint.
    pub async fn write_message_info(
        &self,
        tx: &mut WriteGuard<'_>,
        folder: &str,
        info: &MessageInfoRecord,
    ) -> Result<()> {
        tx.begin().await?;
        let result = self.write_message_info_inner(folder, info).await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                let _ = tx.abort().await;
                Err(err)
            }
        }
    }

    async fn write_message_info_inner(&self, folder: &str, info: &MessageInfoRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO \"{folder}\" \
            (uid, flags, read, deleted, replied, important, junk, attachment, dirty, \
             subject, mail_from, mail_to, mail_cc, mlist, dsent, dreceived, created, modified, \
             part, labels, usertags, cinfo, bdata, size, followup_flag, followup_completed_on, followup_due_by) \
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                     strftime('%s','now'), strftime('%s','now'), ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&info.uid)
        .bind(info.flags as i64)
        .bind(info.read)
        .bind(info.deleted)
        .bind(info.replied)
        .bind(info.important)
        .bind(info.junk)
        .bind(info.attachment)
        .bind(info.dirty)
        .bind(&info.subject)
        .bind(&info.mail_from)
        .bind(&info.mail_to)
        .bind(&info.mail_cc)
        .bind(&info.mlist)
        .bind(info.dsent)
        .bind(info.dreceived)
        .bind(&info.part)
        .bind(&info.labels)
        .bind(&info.usertags)
        .bind(&info.cinfo)
        .bind(&info.bdata)
        .bind(info.size)
        .bind(&info.followup_flag)
        .bind(info.followup_completed_on)
        .bind(info.followup_due_by)
        .execute(self.pool())
        .await?;

        if let Some(bodystructure) = &info.bodystructure {
            sqlx::query(&format!(
                "INSERT OR REPLACE INTO \"{folder}_bodystructure\" (uid, bodystructure) VALUES (?, ?)"
            ))
            .bind(&info.uid)
            .bind(bodystructure)
            .execute(self.pool())
            .await?;
        }
        self.request_sync();
        Ok(())
    }

    /// Like [`write_message_info`](Self::write_message_info) but used for a
    /// brand-new uid where no prior row can exist (same statement either way
    /// given `INSERT OR REPLACE`; kept as a distinct entry point for callers
    /// that want to assert freshness).
    pub async fn write_fresh_message_info(
        &self,
        tx: &mut WriteGuard<'_>,
        folder: &str,
        info: &MessageInfoRecord,
    ) -> Result<()> {
        self.write_message_info(tx, folder, info).await
    }

    pub async fn write_folder_info(&self, tx: &mut WriteGuard<'_>, info: &FolderInfoRecord) -> Result<()> {
        tx.begin().await?;
        let result = sqlx::query(
            "INSERT INTO folders \
             (folder_name, version, flags, nextuid, time, saved_count, unread_count, \
              deleted_count, junk_count, visible_count, jnd_count, bdata) \
             VALUES (?, ?, ?, ?, strftime('%s','now'), ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(folder_name) DO UPDATE SET \
             version=excluded.version, flags=excluded.flags, nextuid=excluded.nextuid, \
             time=excluded.time, saved_count=excluded.saved_count, unread_count=excluded.unread_count, \
             deleted_count=excluded.deleted_count, junk_count=excluded.junk_count, \
             visible_count=excluded.visible_count, jnd_count=excluded.jnd_count, bdata=excluded.bdata",
        )
        .bind(&info.name)
        .bind(info.version)
        .bind(info.flags as i64)
        .bind(info.nextuid)
        .bind(info.saved_count)
        .bind(info.unread_count)
        .bind(info.deleted_count)
        .bind(info.junk_count)
        .bind(info.visible_count)
        .bind(info.jnd_count)
        .bind(&info.bdata)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                let _ = tx.abort().await;
                Err(err.into())
            }
        }
    }

    pub async fn read_folder_info(&self, name: &str) -> Result<Option<FolderInfoRecord>> {
        let row = sqlx::query("SELECT * FROM folders WHERE folder_name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| FolderInfoRecord {
            name: r.try_get::<String, _>("folder_name").unwrap_or_default(),
            version: r.try_get::<i64, _>("version").unwrap_or(2) as i32,
            flags: r.try_get::<i64, _>("flags").unwrap_or(0) as u32,
            nextuid: r.try_get::<i64, _>("nextuid").unwrap_or(1),
            time: r.try_get::<i64, _>("time").unwrap_or(0),
            saved_count: r.try_get::<i64, _>("saved_count").unwrap_or(0),
            unread_count: r.try_get::<i64, _>("unread_count").unwrap_or(0),
            deleted_count: r.try_get::<i64, _>("deleted_count").unwrap_or(0),
            junk_count: r.try_get::<i64, _>("junk_count").unwrap_or(0),
            visible_count: r.try_get::<i64, _>("visible_count").unwrap_or(0),
            jnd_count: r.try_get::<i64, _>("jnd_count").unwrap_or(0),
            bdata: r.try_get::<Option<String>, _>("bdata").unwrap_or(None),
        }))
    }

    /// Builds the column-index -> ident map from the first row's column
    /// metadata.
    fn column_idents(row: &sqlx::sqlite::SqliteRow) -> Vec<ColumnIdent> {
        row.columns()
            .iter()
            .map(|c| ColumnIdent::from_name(c.name()))
            .collect()
    }

    fn row_to_record(idents: &[ColumnIdent], row: &sqlx::sqlite::SqliteRow) -> MessageInfoRecord {
        let mut rec = MessageInfoRecord::new("");
        for (i, ident) in idents.iter().enumerate() {
            match ident {
                ColumnIdent::Uid => rec.uid = row_get_string(row, i).unwrap_or_default(),
                ColumnIdent::Flags => rec.flags = row_get_i64(row, i) as u32,
                ColumnIdent::Read => rec.read = row_get_i64(row, i) != 0,
                ColumnIdent::Deleted => rec.deleted = row_get_i64(row, i) != 0,
                ColumnIdent::Replied => rec.replied = row_get_i64(row, i) != 0,
                ColumnIdent::Important => rec.important = row_get_i64(row, i) != 0,
                ColumnIdent::Junk => rec.junk = row_get_i64(row, i) != 0,
                ColumnIdent::Attachment => rec.attachment = row_get_i64(row, i) != 0,
                ColumnIdent::Dirty => rec.dirty = row_get_i64(row, i) != 0,
                ColumnIdent::Subject => rec.subject = row_get_string(row, i),
                ColumnIdent::MailFrom => rec.mail_from = row_get_string(row, i),
                ColumnIdent::MailTo => rec.mail_to = row_get_string(row, i),
                ColumnIdent::MailCc => rec.mail_cc = row_get_string(row, i),
                ColumnIdent::Mlist => rec.mlist = row_get_string(row, i),
                ColumnIdent::Dsent => rec.dsent = row_get_i64(row, i),
                ColumnIdent::Dreceived => rec.dreceived = row_get_i64(row, i),
                ColumnIdent::Created => rec.created = row_get_i64(row, i),
                ColumnIdent::Modified => rec.modified = row_get_i64(row, i),
                ColumnIdent::Part => rec.part = row_get_string(row, i),
                ColumnIdent::Labels => rec.labels = row_get_string(row, i),
                ColumnIdent::Usertags => rec.usertags = row_get_string(row, i),
                ColumnIdent::Cinfo => rec.cinfo = row_get_string(row, i),
                ColumnIdent::Bdata => rec.bdata = row_get_string(row, i),
                ColumnIdent::Size => rec.size = row_get_i64(row, i),
                ColumnIdent::FollowupFlag => rec.followup_flag = row_get_string(row, i),
                ColumnIdent::FollowupCompletedOn => {
                    rec.followup_completed_on = row.try_get::<Option<i64>, _>(i).ok().flatten()
                }
                ColumnIdent::FollowupDueBy => {
                    rec.followup_due_by = row.try_get::<Option<i64>, _>(i).ok().flatten()
                }
                ColumnIdent::Unknown => {}
            }
        }
        rec
    }

    pub async fn read_message_info_record(&self, folder: &str, uid: &str) -> Result<Option<MessageInfoRecord>> {
        let row = sqlx::query(&format!("SELECT * FROM \"{folder}\" WHERE uid = ?"))
            .bind(uid)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| {
            let idents = Self::column_idents(&r);
            Self::row_to_record(&idents, &r)
        }))
    }

    pub async fn read_message_info_records(&self, folder: &str) -> Result<Vec<MessageInfoRecord>> {
        let rows = sqlx::query(&format!("SELECT * FROM \"{folder}\""))
            .fetch_all(self.pool())
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let idents = Self::column_idents(&rows[0]);
        Ok(rows.iter().map(|r| Self::row_to_record(&idents, r)).collect())
    }

    pub async fn read_preview(&self, folder: &str, uid: &str) -> Result<Option<PreviewRow>> {
        let row = sqlx::query(&format!("SELECT uid, preview FROM \"{folder}_preview\" WHERE uid = ?"))
            .bind(uid)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| PreviewRow {
            uid: r.try_get::<String, _>(0).unwrap_or_default(),
            preview: r.try_get::<String, _>(1).unwrap_or_default(),
        }))
    }

    /// Tombstone-then-delete a single uid.
    pub async fn delete_uid(&self, tx: &mut WriteGuard<'_>, folder: &str, uid: &str) -> Result<()> {
        self.delete_uids(tx, folder, &[uid.to_string()]).await
    }

    /// Batched tombstone-then-delete for many uids in a single `IN (...)`.
    pub async fn delete_uids(&self, tx: &mut WriteGuard<'_>, folder: &str, uids: &[String]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        tx.begin().await?;
        let result = self.delete_uids_inner(folder, uids).await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                let _ = tx.abort().await;
                Err(err)
            }
        }
    }

    async fn delete_uids_inner(&self, folder: &str, uids: &[String]) -> Result<()> {
        for uid in uids {
            sqlx::query("INSERT INTO Deletes (uid, time, mailbox) VALUES (?, strftime('%s','now'), ?)")
                .bind(uid)
                .bind(folder)
                .execute(self.pool())
                .await?;
        }
        let placeholders = uids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let bs_sql = format!("DELETE FROM \"{folder}_bodystructure\" WHERE uid IN ({placeholders})");
        let mut q = sqlx::query(&bs_sql);
        for uid in uids {
            q = q.bind(uid);
        }
        q.execute(self.pool()).await?;

        let prev_sql = format!("DELETE FROM \"{folder}_preview\" WHERE uid IN ({placeholders})");
        let mut q = sqlx::query(&prev_sql);
        for uid in uids {
            q = q.bind(uid);
        }
        q.execute(self.pool()).await?;

        let main_sql = format!("DELETE FROM \"{folder}\" WHERE uid IN ({placeholders})");
        let mut q = sqlx::query(&main_sql);
        for uid in uids {
            q = q.bind(uid);
        }
        q.execute(self.pool()).await?;
        self.request_sync();
        Ok(())
    }

    /// As `delete_uids`, but keyed on `vuid` in a virtual folder's summary
    /// and without tombstone rows.
    pub async fn delete_vuids(&self, tx: &mut WriteGuard<'_>, folder: &str, vuids: &[String]) -> Result<()> {
        if vuids.is_empty() {
            return Ok(());
        }
        tx.begin().await?;
        let placeholders = vuids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!("DELETE FROM \"{folder}\" WHERE uid IN ({placeholders})");
        let mut q = sqlx::query(&sql);
        for vuid in vuids {
            q = q.bind(vuid);
        }
        let result = q.execute(self.pool()).await;
        match result {
            Ok(_) => {
                tx.commit().await?;
                self.request_sync();
                Ok(())
            }
            Err(err) => {
                let _ = tx.abort().await;
                Err(err.into())
            }
        }
    }

    async fn tombstone_all_current(&self, folder: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO Deletes (uid, time, mailbox) SELECT uid, strftime('%s','now'), ? FROM \"{folder}\""
        );
        sqlx::query(&sql).bind(folder).execute(self.pool()).await?;
        Ok(())
    }

    pub async fn clear_folder_summary(&self, tx: &mut WriteGuard<'_>, folder: &str) -> Result<()> {
        tx.begin().await?;
        let result = async {
            self.tombstone_all_current(folder).await?;
            self.exec(&format!("DELETE FROM \"{folder}\"")).await?;
            self.exec(&format!("DELETE FROM \"{folder}_bodystructure\"")).await?;
            self.exec(&format!("DELETE FROM \"{folder}_preview\"")).await
        }
        .await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                self.request_sync();
                Ok(())
            }
            Err(err) => {
                let _ = tx.abort().await;
                Err(err)
            }
        }
    }

    pub async fn delete_folder(&self, tx: &mut WriteGuard<'_>, folder: &str) -> Result<()> {
        tx.begin().await?;
        let result = async {
            self.tombstone_all_current(folder).await?;
            self.exec(&format!("DROP TABLE IF EXISTS \"{folder}\"")).await?;
            self.exec(&format!("DROP TABLE IF EXISTS \"{folder}_bodystructure\"")).await?;
            self.exec(&format!("DROP TABLE IF EXISTS \"{folder}_preview\"")).await?;
            self.exec(&format!("DROP TABLE IF EXISTS \"{folder}_version\"")).await?;
            sqlx::query("DELETE FROM folders WHERE folder_name = ?")
                .bind(folder)
                .execute(self.pool())
                .await?;
            Ok::<(), StoreError>(())
        }
        .await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                self.request_sync();
                Ok(())
            }
            Err(err) => {
                let _ = tx.abort().await;
                Err(err)
            }
        }
    }

    /// Renames `<old>` and `<old>_version`, plus `folders.folder_name`.
    pub async fn rename_folder(&self, tx: &mut WriteGuard<'_>, old: &str, new: &str) -> Result<()> {
        tx.begin().await?;
        let result = async {
            self.tombstone_all_current(old).await?;
            self.exec(&format!("ALTER TABLE \"{old}\" RENAME TO \"{new}\"")).await?;
            self.exec(&format!("ALTER TABLE \"{old}_version\" RENAME TO \"{new}_version\""))
                .await?;
            if let Err(err) = self
                .exec(&format!("ALTER TABLE \"{old}_bodystructure\" RENAME TO \"{new}_bodystructure\""))
                .await
            {
                if !is_no_such_table(&err) {
                    return Err(err);
                }
            }
            if let Err(err) = self
                .exec(&format!("ALTER TABLE \"{old}_preview\" RENAME TO \"{new}_preview\""))
                .await
            {
                if !is_no_such_table(&err) {
                    return Err(err);
                }
            }
            sqlx::query(
                "UPDATE folders SET folder_name = ?, time = strftime('%s','now') WHERE folder_name = ?",
            )
            .bind(new)
            .bind(old)
            .execute(self.pool())
            .await?;
            Ok::<(), StoreError>(())
        }
        .await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                self.request_sync();
                Ok(())
            }
            Err(err) => {
                let _ = tx.abort().await;
                Err(err)
            }
        }
    }

    pub async fn count_total(&self, folder: &str) -> Result<i64> {
        self.count(&format!("SELECT COUNT(*) FROM \"{folder}\"")).await
    }

    pub async fn count_unread(&self, folder: &str) -> Result<i64> {
        self.count(&format!("SELECT COUNT(*) FROM \"{folder}\" WHERE read = 0")).await
    }

    pub async fn count_visible(&self, folder: &str) -> Result<i64> {
        self.count(&format!("SELECT COUNT(*) FROM \"{folder}\" WHERE deleted = 0 AND junk = 0"))
            .await
    }

    pub async fn count_junk(&self, folder: &str) -> Result<i64> {
        self.count(&format!("SELECT COUNT(*) FROM \"{folder}\" WHERE junk = 1")).await
    }

    pub async fn count_deleted(&self, folder: &str) -> Result<i64> {
        self.count(&format!("SELECT COUNT(*) FROM \"{folder}\" WHERE deleted = 1")).await
    }

    pub async fn count_visible_unread(&self, folder: &str) -> Result<i64> {
        self.count(&format!(
            "SELECT COUNT(*) FROM \"{folder}\" WHERE deleted = 0 AND junk = 0 AND read = 0"
        ))
        .await
    }

    pub async fn count_junk_not_deleted(&self, folder: &str) -> Result<i64> {
        self.count(&format!("SELECT COUNT(*) FROM \"{folder}\" WHERE junk = 1 AND deleted = 0"))
            .await
    }

    pub async fn read_tombstones_since(&self, since: i64) -> Result<Vec<TombstoneRow>> {
        let rows = sqlx::query("SELECT id, uid, time, mailbox FROM Deletes WHERE time >= ?")
            .bind(since)
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .iter()
            .map(|r| TombstoneRow {
                id: r.try_get::<i64, _>(0).unwrap_or(0),
                uid: r.try_get::<String, _>(1).unwrap_or_default(),
                time: r.try_get::<i64, _>(2).unwrap_or(0),
                mailbox: r.try_get::<String, _>(3).unwrap_or_default(),
            })
            .collect())
    }

    /// Deletes tombstones older than `retention_secs`.
    pub async fn trim_tombstones(&self, now: i64, retention_secs: i64) -> Result<u64> {
        let cutoff = now - retention_secs;
        let result = sqlx::query("DELETE FROM Deletes WHERE time < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

use sqlx::Column;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handle::Database;

    async fn open_test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.create_folders_table().await.unwrap();
        db.prepare_message_info_table("INBOX").await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn write_and_read_roundtrip() {
        let (_dir, db) = open_test_db().await;
        let mut tx = db.begin_write().await.unwrap();
        let mut info = MessageInfoRecord::new("u1");
        info.subject = Some("hello".into());
        db.write_message_info(&mut tx, "INBOX", &info).await.unwrap();
        tx.commit().await.unwrap();

        let read = db.read_message_info_record("INBOX", "u1").await.unwrap().unwrap();
        assert_eq!(read.subject.as_deref(), Some("hello"));
        db.close().await;
    }

    #[tokio::test]
    async fn delete_uid_writes_tombstone() {
        let (_dir, db) = open_test_db().await;
        let mut tx = db.begin_write().await.unwrap();
        let info = MessageInfoRecord::new("u1");
        db.write_message_info(&mut tx, "INBOX", &info).await.unwrap();
        db.delete_uid(&mut tx, "INBOX", "u1").await.unwrap();
        tx.commit().await.unwrap();

        assert!(db.read_message_info_record("INBOX", "u1").await.unwrap().is_none());
        let tombstones = db.read_tombstones_since(0).await.unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].uid, "u1");
        db.close().await;
    }

    #[tokio::test]
    async fn counts_reflect_flags() {
        let (_dir, db) = open_test_db().await;
        let mut tx = db.begin_write().await.unwrap();
        let mut unread = MessageInfoRecord::new("u1");
        unread.read = false;
        let mut read = MessageInfoRecord::new("u2");
        read.read = true;
        db.write_message_info(&mut tx, "INBOX", &unread).await.unwrap();
        db.write_message_info(&mut tx, "INBOX", &read).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(db.count_total("INBOX").await.unwrap(), 2);
        assert_eq!(db.count_unread("INBOX").await.unwrap(), 1);
        db.close().await;
    }

    #[tokio::test]
    async fn rename_folder_updates_tables_and_registry() {
        let (_dir, db) = open_test_db().await;
        let mut tx = db.begin_write().await.unwrap();
        db.write_folder_info(&mut tx, &FolderInfoRecord::new("INBOX")).await.unwrap();
        db.rename_folder(&mut tx, "INBOX", "Archive").await.unwrap();
        tx.commit().await.unwrap();

        assert!(db.read_folder_info("INBOX").await.unwrap().is_none());
        assert!(db.read_folder_info("Archive").await.unwrap().is_some());
        assert_eq!(db.count_total("Archive").await.unwrap(), 0);
        db.close().await;
    }

    #[tokio::test]
    async fn migrates_legacy_table_up_to_version_two() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.create_folders_table().await.unwrap();

        // A v0-shaped table: no `flags`/`followup_*` columns, dirty values
        // carried under the old `msg_security` name the new schema doesn't
        // know.
        db.exec("CREATE TABLE \"Inbox\" (uid TEXT PRIMARY KEY, msg_security INTEGER, subject TEXT, created INTEGER, modified INTEGER)")
            .await
            .unwrap();
        db.exec("INSERT INTO \"Inbox\" VALUES ('1', 1, 's1', 0, 0)").await.unwrap();
        db.exec("INSERT INTO \"Inbox\" VALUES ('2', 0, 's2', 0, 0)").await.unwrap();
        db.exec("INSERT INTO \"Inbox\" VALUES ('3', 1, 's3', 0, 0)").await.unwrap();
        db.exec("CREATE TABLE \"Inbox_version\" (version TEXT)").await.unwrap();
        db.exec("INSERT INTO \"Inbox_version\" VALUES ('0')").await.unwrap();

        let before = chrono::Utc::now().timestamp();
        db.prepare_message_info_table("Inbox").await.unwrap();

        let version = db.read_schema_version("Inbox").await.unwrap();
        assert_eq!(version, 2);

        let rows = db.read_message_info_records("Inbox").await.unwrap();
        let mut dirty_by_uid: Vec<(String, bool)> = rows.iter().map(|r| (r.uid.clone(), r.dirty)).collect();
        dirty_by_uid.sort();
        assert_eq!(
            dirty_by_uid,
            vec![("1".to_string(), true), ("2".to_string(), false), ("3".to_string(), true)]
        );
        for row in &rows {
            assert!(row.created >= before);
            assert!(row.modified >= before);
        }
        db.close().await;
    }

    #[tokio::test]
    async fn refuses_future_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.exec(&create_table_sql("Inbox")).await.unwrap();
        db.exec("CREATE TABLE \"Inbox_version\" (version TEXT)").await.unwrap();
        db.exec("INSERT INTO \"Inbox_version\" VALUES ('99')").await.unwrap();

        let err = db.prepare_message_info_table("Inbox").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
        db.close().await;
    }
}
