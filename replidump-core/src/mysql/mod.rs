//! The MySQL control surface: database enumeration and replication state.
//!
//! The orchestrator only ever talks to this trait; production wires in
//! [`MysqlReplica`], tests substitute their own implementation. Dumps do not
//! go through here — `mysqldump` opens its own connection.

use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Row};
use tracing::info;

use crate::config::Settings;
use crate::errors::ReplicaError;

pub trait ReplicaServer: Send {
    /// Names of every database currently on the server.
    fn database_names(&mut self) -> Result<Vec<String>, ReplicaError>;

    /// Whether both replication threads are running.
    fn is_replica_running(&mut self) -> Result<bool, ReplicaError>;

    fn start_replica(&mut self) -> Result<(), ReplicaError>;

    fn stop_replica(&mut self) -> Result<(), ReplicaError>;
}

/// A live connection to the replica's `mysql` schema.
pub struct MysqlReplica {
    conn: Conn,
}

impl MysqlReplica {
    pub fn connect(settings: &Settings) -> Result<MysqlReplica, ReplicaError> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(settings.mysql.host.clone()))
            .user(Some(settings.mysql.username.clone()))
            .pass(Some(settings.mysql.password.clone()))
            .db_name(Some("mysql".to_string()));
        let conn = Conn::new(opts)?;
        Ok(MysqlReplica { conn })
    }
}

impl ReplicaServer for MysqlReplica {
    fn database_names(&mut self) -> Result<Vec<String>, ReplicaError> {
        Ok(self.conn.query("SHOW DATABASES")?)
    }

    fn is_replica_running(&mut self) -> Result<bool, ReplicaError> {
        let row: Row = self
            .conn
            .query_first("SHOW SLAVE STATUS")?
            .ok_or(ReplicaError::NotAReplica)?;
        let io_running: Option<String> = row.get("Slave_IO_Running");
        let sql_running: Option<String> = row.get("Slave_SQL_Running");
        Ok(io_running.as_deref() == Some("Yes") && sql_running.as_deref() == Some("Yes"))
    }

    fn start_replica(&mut self) -> Result<(), ReplicaError> {
        info!("issuing START SLAVE");
        Ok(self.conn.query_drop("START SLAVE")?)
    }

    fn stop_replica(&mut self) -> Result<(), ReplicaError> {
        info!("issuing STOP SLAVE");
        Ok(self.conn.query_drop("STOP SLAVE")?)
    }
}
