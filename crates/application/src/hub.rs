//! 推送中心（Hub）
//!
//! 持有全部在线会话及三张索引：`sessions`、`by_user`、`by_room`，由一把读写锁保护。
//! 所有修改操作持写锁，所有查询和遍历持读锁直到遍历结束；入队是非阻塞的
//! `try_send`，从不在持锁期间等待网络 I/O。
//!
//! 入队失败（队列满或已关闭）的会话视为不可用：立即关闭其队列，并在调用
//! 返回之前从索引中移除，随后通知同房间的其他会话该用户离线。
//!
//! 在线状态只在房间内传播：加入房间时通知房间内已有成员，下线时通知
//! 该会话所在房间的成员。不共享房间的用户彼此看不到对方的在线状态。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use domain::{kinds, ChatMembership, Connected, Frame, OnlineStatus, RoomId, SessionId, UserId};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::HubError;
use crate::session::{EncodedFrame, OutboundQueue, SessionHandle};

struct SessionEntry {
    handle: Arc<SessionHandle>,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<SessionId, SessionEntry>,
    by_user: HashMap<UserId, SessionId>,
    by_room: HashMap<RoomId, HashSet<SessionId>>,
}

impl HubState {
    fn insert(&mut self, handle: Arc<SessionHandle>) {
        self.by_user.insert(handle.user_id(), handle.id());
        self.sessions.insert(
            handle.id(),
            SessionEntry {
                handle,
                rooms: HashSet::new(),
            },
        );
    }

    /// 从三张索引中摘除会话，连同它所在的房间一起返回；不存在时返回 None
    fn detach(&mut self, session_id: SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(&session_id)?;
        let user_id = entry.handle.user_id();

        // 只有索引仍指向本会话时才移除，避免迟到的注销顶掉更新的会话
        if self.by_user.get(&user_id) == Some(&session_id) {
            self.by_user.remove(&user_id);
        }

        for room_id in &entry.rooms {
            if let Some(members) = self.by_room.get_mut(room_id) {
                members.remove(&session_id);
                if members.is_empty() {
                    self.by_room.remove(room_id);
                }
            }
        }

        Some(entry)
    }

    fn entry_of(&mut self, user_id: UserId) -> Option<&mut SessionEntry> {
        let session_id = self.by_user.get(&user_id)?;
        self.sessions.get_mut(session_id)
    }
}

/// 扇出目标
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    User(UserId),
    Room(RoomId),
    /// 多个房间的成员，同一会话只投递一次
    Peers(&'a HashSet<RoomId>),
    All,
}

struct HubInner {
    state: RwLock<HubState>,
    closed: AtomicBool,
    queue_capacity: usize,
    clock: Arc<dyn Clock>,
}

/// 推送中心句柄，克隆开销很小
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

/// 不持有所有权的推送中心引用，会话读写循环只用它来请求注销
#[derive(Clone)]
pub struct WeakHub {
    inner: Weak<HubInner>,
}

impl WeakHub {
    pub fn upgrade(&self) -> Option<Hub> {
        self.inner.upgrade().map(|inner| Hub { inner })
    }
}

fn encode(kind: &str, data: impl Serialize) -> Result<EncodedFrame, HubError> {
    let frame = Frame::new(kind, data)?;
    Ok(Arc::from(frame.to_json()?))
}

fn ensure_room(room_id: RoomId) -> Result<(), HubError> {
    if room_id.0 == 0 {
        return Err(HubError::invalid_argument("room_id", "must be non-zero"));
    }
    Ok(())
}

fn ensure_user(user_id: UserId) -> Result<(), HubError> {
    if user_id.0 == 0 {
        return Err(HubError::invalid_argument("user_id", "must be non-zero"));
    }
    Ok(())
}

impl Hub {
    pub fn new(queue_capacity: usize, clock: Arc<dyn Clock>) -> Result<Self, HubError> {
        if queue_capacity == 0 {
            return Err(HubError::invalid_argument(
                "queue_capacity",
                "must be positive",
            ));
        }

        Ok(Self {
            inner: Arc::new(HubInner {
                state: RwLock::new(HubState::default()),
                closed: AtomicBool::new(false),
                queue_capacity,
                clock,
            }),
        })
    }

    pub fn downgrade(&self) -> WeakHub {
        WeakHub {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), HubError> {
        if self.is_shut_down() {
            Err(HubError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// 为已认证的用户创建会话句柄及其发送队列，尚未注册
    pub fn open_session(
        &self,
        user_id: UserId,
    ) -> Result<(Arc<SessionHandle>, OutboundQueue), HubError> {
        self.ensure_open()?;
        ensure_user(user_id)?;
        Ok(SessionHandle::new(user_id, self.inner.queue_capacity))
    }

    /// 注册会话。同一用户已有会话时，旧会话被顶替并关闭。
    pub async fn register(&self, session: Arc<SessionHandle>) -> Result<(), HubError> {
        let user_id = session.user_id();
        ensure_user(user_id)?;

        let connected = encode(
            kinds::CONNECTED,
            Connected {
                client_id: session.id(),
                user_id,
            },
        )?;

        let mut failed = Vec::new();
        let displaced = {
            let mut state = self.inner.state.write().await;
            if self.is_shut_down() {
                session.close();
                return Err(HubError::ShutDown);
            }
            if state.sessions.contains_key(&session.id()) {
                return Err(HubError::invalid_argument(
                    "session",
                    format!("session {} is already registered", session.id()),
                ));
            }

            let displaced = state
                .by_user
                .get(&user_id)
                .copied()
                .and_then(|previous| state.detach(previous))
                .map(|entry| entry.handle);
            state.insert(session.clone());

            // 持锁入队，保证 connected 是新会话收到的第一帧
            if session.send(connected).is_err() {
                failed.push(session.clone());
            }
            displaced
        };

        if let Some(previous) = displaced {
            previous.close();
            tracing::info!(
                user_id = %user_id,
                session_id = %previous.id(),
                replaced_by = %session.id(),
                "旧会话被新连接顶替"
            );
        }
        tracing::info!(user_id = %user_id, session_id = %session.id(), "会话已注册");

        self.evict(failed).await;
        Ok(())
    }

    /// 注销会话，返回会话是否仍在索引中。
    ///
    /// 无论结果如何，会话队列都会被关闭；关闭后的推送中心上调用是空操作。
    pub async fn unregister(&self, session: &SessionHandle) -> bool {
        let removed = self.inner.state.write().await.detach(session.id());
        session.close();

        let Some(entry) = removed else {
            return false;
        };
        tracing::info!(user_id = %session.user_id(), session_id = %session.id(), "会话已注销");

        self.announce_offline(vec![entry]).await;
        true
    }

    /// 把用户当前会话加入房间；用户离线时返回 `Ok(false)`。重复加入是幂等的。
    ///
    /// 首次加入时向房间内其他成员通知该用户在线。
    pub async fn join_room(&self, user_id: UserId, room_id: RoomId) -> Result<bool, HubError> {
        self.ensure_open()?;
        ensure_room(room_id)?;
        let ack = self.membership_frame(kinds::CHAT_JOINED, room_id)?;
        let online = self.online_status_frame(user_id, true)?;

        let (session, newly_joined) = {
            let mut state = self.inner.state.write().await;
            self.ensure_open()?;
            let Some(entry) = state.entry_of(user_id) else {
                return Ok(false);
            };
            let newly_joined = entry.rooms.insert(room_id);
            let handle = entry.handle.clone();
            state
                .by_room
                .entry(room_id)
                .or_default()
                .insert(handle.id());
            (handle, newly_joined)
        };

        tracing::debug!(user_id = %user_id, room_id = %room_id, "加入房间");
        let mut failed = Vec::new();
        if session.send(ack).is_err() {
            failed.push(session);
        }
        if newly_joined {
            let (_, more) = self
                .fan_out(Target::Room(room_id), &online, &[user_id])
                .await;
            failed.extend(more);
        }
        self.evict(failed).await;
        Ok(true)
    }

    /// 把用户当前会话移出房间；用户离线时返回 `Ok(false)`
    pub async fn leave_room(&self, user_id: UserId, room_id: RoomId) -> Result<bool, HubError> {
        self.ensure_open()?;
        ensure_room(room_id)?;
        let ack = self.membership_frame(kinds::CHAT_LEFT, room_id)?;

        let session = {
            let mut state = self.inner.state.write().await;
            self.ensure_open()?;
            let Some(entry) = state.entry_of(user_id) else {
                return Ok(false);
            };
            entry.rooms.remove(&room_id);
            let handle = entry.handle.clone();
            if let Some(members) = state.by_room.get_mut(&room_id) {
                members.remove(&handle.id());
                if members.is_empty() {
                    state.by_room.remove(&room_id);
                }
            }
            handle
        };

        tracing::debug!(user_id = %user_id, room_id = %room_id, "离开房间");
        if session.send(ack).is_err() {
            self.evict(vec![session]).await;
        }
        Ok(true)
    }

    /// 发给用户的当前会话；离线时静默丢弃，返回是否入队成功
    pub async fn send_to_user(
        &self,
        user_id: UserId,
        kind: &str,
        data: impl Serialize,
    ) -> Result<bool, HubError> {
        self.ensure_open()?;
        ensure_user(user_id)?;
        let frame = encode(kind, data)?;
        let (delivered, failed) = self.fan_out(Target::User(user_id), &frame, &[]).await;
        self.evict(failed).await;
        Ok(delivered > 0)
    }

    /// 直接发给指定会话（例如 pong、错误提示），不经过用户索引
    pub async fn send_to_session(
        &self,
        session: &Arc<SessionHandle>,
        kind: &str,
        data: impl Serialize,
    ) -> Result<bool, HubError> {
        self.ensure_open()?;
        let frame = encode(kind, data)?;
        if session.send(frame).is_ok() {
            return Ok(true);
        }
        self.evict(vec![session.clone()]).await;
        Ok(false)
    }

    /// 发给房间内除 `exclude` 用户以外的所有会话，返回成功入队的会话数
    pub async fn send_to_room(
        &self,
        room_id: RoomId,
        kind: &str,
        data: impl Serialize,
        exclude: &[UserId],
    ) -> Result<usize, HubError> {
        self.ensure_open()?;
        ensure_room(room_id)?;
        let frame = encode(kind, data)?;
        let (delivered, failed) = self.fan_out(Target::Room(room_id), &frame, exclude).await;
        self.evict(failed).await;
        Ok(delivered)
    }

    /// 发给全部在线会话
    pub async fn broadcast(&self, kind: &str, data: impl Serialize) -> Result<usize, HubError> {
        self.ensure_open()?;
        let frame = encode(kind, data)?;
        let (delivered, failed) = self.fan_out(Target::All, &frame, &[]).await;
        self.evict(failed).await;
        Ok(delivered)
    }

    /// 关闭所有会话队列并清空索引，返回关闭的会话数。之后的操作返回 `ShutDown`。
    pub async fn shutdown(&self) -> usize {
        let sessions: Vec<Arc<SessionHandle>> = {
            let mut state = self.inner.state.write().await;
            self.inner.closed.store(true, Ordering::Release);
            state.by_user.clear();
            state.by_room.clear();
            state
                .sessions
                .drain()
                .map(|(_, entry)| entry.handle)
                .collect()
        };

        for session in &sessions {
            session.close();
        }
        tracing::info!(sessions = sessions.len(), "推送中心已关闭");
        sessions.len()
    }

    // ---- 查询 ----

    /// 在线用户，按 ID 升序
    pub async fn online_users(&self) -> Vec<UserId> {
        let state = self.inner.state.read().await;
        let mut users: Vec<UserId> = state.by_user.keys().copied().collect();
        users.sort_unstable();
        users
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.state.read().await.by_user.contains_key(&user_id)
    }

    /// 用户当前会话的 ID
    pub async fn current_session(&self, user_id: UserId) -> Option<SessionId> {
        self.inner.state.read().await.by_user.get(&user_id).copied()
    }

    /// 房间内在线成员，按 ID 升序
    pub async fn room_members(&self, room_id: RoomId) -> Vec<UserId> {
        let state = self.inner.state.read().await;
        let mut members: Vec<UserId> = state
            .by_room
            .get(&room_id)
            .into_iter()
            .flatten()
            .filter_map(|session_id| state.sessions.get(session_id))
            .map(|entry| entry.handle.user_id())
            .collect();
        members.sort_unstable();
        members
    }

    pub async fn is_user_in_room(&self, user_id: UserId, room_id: RoomId) -> bool {
        let state = self.inner.state.read().await;
        let Some(session_id) = state.by_user.get(&user_id) else {
            return false;
        };
        state
            .by_room
            .get(&room_id)
            .is_some_and(|members| members.contains(session_id))
    }

    pub async fn session_count(&self) -> usize {
        self.inner.state.read().await.sessions.len()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.state.read().await.by_room.len()
    }

    // ---- 内部 ----

    fn online_status_frame(&self, user_id: UserId, is_online: bool) -> Result<EncodedFrame, HubError> {
        encode(
            kinds::USER_ONLINE_STATUS,
            OnlineStatus {
                user_id,
                is_online,
                last_seen: self.inner.clock.now(),
            },
        )
    }

    fn membership_frame(&self, kind: &str, room_id: RoomId) -> Result<EncodedFrame, HubError> {
        encode(
            kind,
            ChatMembership {
                chat_id: room_id,
                timestamp: self.inner.clock.now(),
            },
        )
    }

    /// 持读锁遍历目标会话并入队，不做任何移除。
    ///
    /// 返回成功入队数和入队失败的会话；失败的会话在这里就被关闭。
    async fn fan_out(
        &self,
        target: Target<'_>,
        frame: &EncodedFrame,
        exclude: &[UserId],
    ) -> (usize, Vec<Arc<SessionHandle>>) {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let state = self.inner.state.read().await;
            let mut deliver = |handle: &Arc<SessionHandle>| {
                if exclude.contains(&handle.user_id()) {
                    return;
                }
                match handle.send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(err) => {
                        tracing::warn!(
                            user_id = %handle.user_id(),
                            session_id = %handle.id(),
                            error = %err,
                            "入队失败，会话将被移除"
                        );
                        failed.push(handle.clone());
                    }
                }
            };

            match target {
                Target::User(user_id) => {
                    if let Some(entry) = state
                        .by_user
                        .get(&user_id)
                        .and_then(|session_id| state.sessions.get(session_id))
                    {
                        deliver(&entry.handle);
                    }
                }
                Target::Room(room_id) => {
                    for session_id in state.by_room.get(&room_id).into_iter().flatten() {
                        if let Some(entry) = state.sessions.get(session_id) {
                            deliver(&entry.handle);
                        }
                    }
                }
                Target::Peers(rooms) => {
                    let peers: HashSet<SessionId> = rooms
                        .iter()
                        .filter_map(|room_id| state.by_room.get(room_id))
                        .flatten()
                        .copied()
                        .collect();
                    for session_id in &peers {
                        if let Some(entry) = state.sessions.get(session_id) {
                            deliver(&entry.handle);
                        }
                    }
                }
                Target::All => {
                    for entry in state.sessions.values() {
                        deliver(&entry.handle);
                    }
                }
            }
        }

        for handle in &failed {
            handle.close();
        }
        (delivered, failed)
    }

    /// 移除不可用的会话并通知离线状态
    async fn evict(&self, failed: Vec<Arc<SessionHandle>>) {
        if failed.is_empty() {
            return;
        }

        let offline: Vec<SessionEntry> = {
            let mut state = self.inner.state.write().await;
            failed
                .iter()
                .filter_map(|session| {
                    session.close();
                    state.detach(session.id())
                })
                .inspect(|entry| {
                    tracing::warn!(
                        user_id = %entry.handle.user_id(),
                        session_id = %entry.handle.id(),
                        "会话不可用，已移除"
                    );
                })
                .collect()
        };

        self.announce_offline(offline).await;
    }

    /// 向下线会话所在房间的成员通知离线；通知途中再失败的会话继续移除，直到没有新的失败
    async fn announce_offline(&self, mut offline: Vec<SessionEntry>) {
        while let Some(entry) = offline.pop() {
            if entry.rooms.is_empty() {
                continue;
            }
            let user_id = entry.handle.user_id();
            let frame = match self.online_status_frame(user_id, false) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::error!(user_id = %user_id, error = %err, "离线状态帧编码失败");
                    continue;
                }
            };

            let (_, failed) = self
                .fan_out(Target::Peers(&entry.rooms), &frame, &[user_id])
                .await;
            if failed.is_empty() {
                continue;
            }

            let mut state = self.inner.state.write().await;
            for session in failed {
                if let Some(removed) = state.detach(session.id()) {
                    tracing::warn!(
                        user_id = %removed.handle.user_id(),
                        session_id = %removed.handle.id(),
                        "会话不可用，已移除"
                    );
                    offline.push(removed);
                }
            }
        }
    }
}
