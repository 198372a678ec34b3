use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};

use crate::coordination::handler::{
    mailbox_key, queue_key, revoked_key, tracked_key, CoordinationStore, Mailbox,
};
use crate::error::{GateError, GateResult};

#[derive(Clone)]
pub struct RedisCoordinationStore {
    connection: MultiplexedConnection,
}

impl RedisCoordinationStore {
    pub async fn connect(redis_url: &str) -> GateResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| GateError::Config(format!("Failed to create Redis client: {}", e)))?;

        let connection = client.get_multiplexed_async_connection().await?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn mark_tracked(&self, entity: &str, ttl: Duration) -> GateResult<bool> {
        let mut connection = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(tracked_key(entity))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut connection)
            .await?;

        Ok(reply.is_some())
    }

    async fn clear_tracked(&self, entity: &str) -> GateResult<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.del(tracked_key(entity)).await?;
        Ok(())
    }

    async fn enqueue(&self, queue: &str, payload: String) -> GateResult<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.lpush(queue_key(queue), payload).await?;
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> GateResult<Option<String>> {
        let mut connection = self.connection.clone();
        let payload: Option<String> = connection.rpop(queue_key(queue), None).await?;
        Ok(payload)
    }

    async fn push_to_mailbox(&self, mailbox: Mailbox, members: &[String]) -> GateResult<()> {
        if members.is_empty() {
            return Ok(());
        }

        let mut connection = self.connection.clone();
        let _: () = connection.sadd(mailbox_key(mailbox), members.to_vec()).await?;
        Ok(())
    }

    async fn drain_mailbox(&self, mailbox: Mailbox) -> GateResult<Vec<String>> {
        let mut connection = self.connection.clone();
        let key = mailbox_key(mailbox);

        let (members, _removed): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .smembers(&key)
            .del(&key)
            .query_async(&mut connection)
            .await?;

        Ok(members)
    }

    async fn revoke_job(&self, job_id: &str) -> GateResult<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.sadd(revoked_key(), job_id).await?;
        Ok(())
    }

    async fn take_revocation(&self, job_id: &str) -> GateResult<bool> {
        let mut connection = self.connection.clone();
        let removed: i64 = connection.srem(revoked_key(), job_id).await?;
        Ok(removed > 0)
    }
}
