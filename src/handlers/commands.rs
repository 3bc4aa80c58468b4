//! Chat command handlers.

use async_trait::async_trait;

use crate::error::{HandlerError, HandlerResult};
use crate::handlers::{ChatCommand, CommandContext, CommandSpec};
use crate::pending::{PendingError, WHOIS_ACCT_PREFIX};
use crate::sync;
use crate::util;

/// All chat commands, in registration order.
pub(super) fn all() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "requestbnc",
            aliases: &["bncrequest"],
            admin: false,
            require_param: false,
            help: "requestbnc - request a BNC account (you must be identified with services)",
            handler: Box::new(RequestBnc),
        },
        CommandSpec {
            name: "acceptbnc",
            aliases: &[],
            admin: true,
            require_param: true,
            help: "usage: acceptbnc <nick> - approve a queued BNC request",
            handler: Box::new(AcceptBnc),
        },
        CommandSpec {
            name: "denybnc",
            aliases: &[],
            admin: true,
            require_param: true,
            help: "usage: denybnc <nick> - deny a queued BNC request",
            handler: Box::new(DenyBnc),
        },
        CommandSpec {
            name: "delbnc",
            aliases: &[],
            admin: true,
            require_param: true,
            help: "usage: delbnc <nick> - delete an existing BNC account",
            handler: Box::new(DelBnc),
        },
        CommandSpec {
            name: "bncresetpass",
            aliases: &[],
            admin: true,
            require_param: true,
            help: "usage: bncresetpass <nick> - reset a BNC account password",
            handler: Box::new(BncResetPass),
        },
        CommandSpec {
            name: "bncrefresh",
            aliases: &[],
            admin: true,
            require_param: false,
            help: "bncrefresh - resynchronize the BNC user list",
            handler: Box::new(BncRefresh),
        },
        CommandSpec {
            name: "bncqueue",
            aliases: &["bncq"],
            admin: true,
            require_param: false,
            help: "bncqueue - list pending BNC requests",
            handler: Box::new(BncQueue),
        },
        CommandSpec {
            name: "bncadmin",
            aliases: &[],
            admin: true,
            require_param: true,
            help: "usage: bncadmin <user> - check whether an account has BNC admin rights",
            handler: Box::new(BncAdmin),
        },
    ]
}

/// `requestbnc`: WHOIS the caller, require services identification, look
/// up the registration date, and queue the request.
struct RequestBnc;

#[async_trait]
impl ChatCommand for RequestBnc {
    async fn run(&self, ctx: CommandContext) -> HandlerResult {
        let conn = &ctx.conn;
        let nick = &ctx.nick;

        let key = format!("{WHOIS_ACCT_PREFIX}{nick}");
        let rx = match conn.pending.begin(&key) {
            Ok(rx) => rx,
            Err(PendingError::AlreadyPending(_)) => {
                ctx.reply_private("A BNC request lookup for you is already in progress.")
                    .await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        conn.send(&["WHOIS", nick]).await;
        let acct = rx.await.map_err(|_| PendingError::Cancelled(key))?;

        if acct.is_empty() {
            ctx.reply_private("You must be identified with services to request a BNC account")
                .await;
            return Ok(());
        }
        if conn.store().state.users.contains_key(&acct) {
            ctx.reply_private(
                "It appears you already have a BNC account. If this is in error, \
                 please contact staff in #help",
            )
            .await;
            return Ok(());
        }

        let registered = {
            let _guard = conn.pending.lock("ns_info").await;
            let rx = conn.pending.begin("ns_info")?;
            conn.msg("NickServ", &format!("INFO {acct}")).await;
            rx.await
                .map_err(|_| PendingError::Cancelled("ns_info".into()))?
        };

        conn.add_queue(&acct, &registered)?;
        ctx.reply_private("BNC request submitted.").await;
        conn.chan_log(&format!(
            "{acct} added to bnc queue. Registered {registered}"
        ))
        .await;
        Ok(())
    }
}

/// `acceptbnc <nick>`: provision the account, then drop the queue entry.
struct AcceptBnc;

#[async_trait]
impl ChatCommand for AcceptBnc {
    async fn run(&self, ctx: CommandContext) -> HandlerResult {
        let conn = &ctx.conn;
        let nick = ctx.first_arg().to_string();

        if !conn.store().state.queue.contains_key(&nick) {
            ctx.reply(&format!("{nick} is not in the BNC queue.")).await;
            return Ok(());
        }
        match conn.add_user(&nick).await {
            Ok(()) => {
                conn.rem_queue(&nick)?;
                conn.chan_log(&format!(
                    "{nick} has been set with BNC access and memoserved credentials."
                ))
                .await;
                Ok(())
            }
            Err(HandlerError::BindHostExhausted) => {
                // Declined, not fatal; the request stays queued.
                ctx.reply(&format!(
                    "Could not provision {nick}: no free bindhost. Request left in the queue."
                ))
                .await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// `denybnc <nick>`: drop the queue entry and memo the requester.
struct DenyBnc;

#[async_trait]
impl ChatCommand for DenyBnc {
    async fn run(&self, ctx: CommandContext) -> HandlerResult {
        let conn = &ctx.conn;
        let nick = ctx.first_arg().to_string();

        if !conn.rem_queue(&nick)? {
            ctx.reply(&format!("{nick} is not in the BNC queue.")).await;
            return Ok(());
        }
        conn.msg(
            "MemoServ",
            &format!("SEND {nick} Your BNC auth could not be added at this time"),
        )
        .await;
        conn.chan_log(&format!("{nick} has been denied. Memoserv sent."))
            .await;
        Ok(())
    }
}

/// `delbnc <nick>`: delete the bouncer account and forget it locally.
struct DelBnc;

#[async_trait]
impl ChatCommand for DelBnc {
    async fn run(&self, ctx: CommandContext) -> HandlerResult {
        let conn = &ctx.conn;
        let nick = ctx.first_arg().to_string();

        if !conn.store().state.users.contains_key(&nick) {
            ctx.reply(&format!("{nick} is not a current BNC user")).await;
            return Ok(());
        }
        conn.module_msg("controlpanel", &format!("deluser {nick}"))
            .await;
        conn.send(&["znc", "saveconfig"]).await;
        {
            let mut store = conn.store();
            store.state.users.remove(&nick);
            store.save()?;
        }
        conn.chan_log(&format!("{} removed BNC: {nick}", ctx.nick))
            .await;
        if conn.config.log_channel.as_deref() != Some(ctx.target.as_str()) {
            ctx.reply("BNC removed").await;
        }
        Ok(())
    }
}

/// `bncresetpass <nick>`: set a fresh password and memo it.
struct BncResetPass;

#[async_trait]
impl ChatCommand for BncResetPass {
    async fn run(&self, ctx: CommandContext) -> HandlerResult {
        let conn = &ctx.conn;
        let nick = ctx.first_arg().to_string();

        if !conn.store().state.users.contains_key(&nick) {
            ctx.reply(&format!("{nick} is not a BNC user.")).await;
            return Ok(());
        }
        let passwd = util::gen_password();
        conn.module_msg("controlpanel", &format!("Set Password {nick} {passwd}"))
            .await;
        conn.send(&["znc", "saveconfig"]).await;
        ctx.reply(&format!("BNC password reset for {nick}")).await;
        let bnc = &conn.config.bnc;
        conn.msg(
            "MemoServ",
            &format!(
                "SEND {nick} [New Password!] Your BNC auth is Username: {nick} \
                 Password: {passwd} (Ports: {} for SSL - {} for NON-SSL) \
                 Help: /server {} {} and /PASS {nick}:{passwd}",
                bnc.port_ssl, bnc.port_plain, bnc.host, bnc.port_plain
            ),
        )
        .await;
        Ok(())
    }
}

/// `bncrefresh`: run a full resynchronization on demand.
struct BncRefresh;

#[async_trait]
impl ChatCommand for BncRefresh {
    async fn run(&self, ctx: CommandContext) -> HandlerResult {
        let conn = &ctx.conn;
        ctx.reply("Updating user list").await;
        conn.chan_log(&format!("{} is updating the BNC user list...", ctx.nick))
            .await;
        sync::run_user_sync(conn).await?;
        conn.chan_log("BNC user list updated.").await;
        Ok(())
    }
}

/// `bncqueue`: show the pending request queue.
struct BncQueue;

#[async_trait]
impl ChatCommand for BncQueue {
    async fn run(&self, ctx: CommandContext) -> HandlerResult {
        let queue = ctx.conn.store().state.queue.clone();
        if queue.is_empty() {
            ctx.reply("BNC request queue is empty").await;
            return Ok(());
        }
        for (nick, registered) in queue {
            ctx.reply(&format!("BNC Queue: {nick} Registered {registered}"))
                .await;
        }
        Ok(())
    }
}

/// `bncadmin <user>`: report the bouncer-side admin flag for an account.
struct BncAdmin;

#[async_trait]
impl ChatCommand for BncAdmin {
    async fn run(&self, ctx: CommandContext) -> HandlerResult {
        let conn = &ctx.conn;
        let user = ctx.first_arg().to_string();

        if !conn.store().state.users.contains_key(&user) {
            ctx.reply(&format!("{user} is not a current BNC user")).await;
            return Ok(());
        }
        if conn.is_bnc_admin(&user).await? {
            ctx.reply(&format!("{user} is a BNC admin.")).await;
        } else {
            ctx.reply(&format!("{user} is not a BNC admin.")).await;
        }
        Ok(())
    }
}
