//! Real-time fan-out through the router with live session channels.
//!
//! Run: cargo test --test router_test

mod test_harness;

use chat_service::websocket::PresenceService;
use test_harness::Harness;

#[tokio::test]
async fn test_group_message_reaches_each_active_session_once() {
    let h = Harness::new();
    let users = h.users(4).await;
    let (x, y, z, leaver) = (users[0], users[1], users[2], users[3]);
    let group = h.group(x, &[y, z, leaver]).await;

    let mut sx = h.connect(x).await;
    let mut sy = h.connect(y).await;
    let mut sz = h.connect(z).await;
    let mut sl = h.connect(leaver).await;

    h.state.conversations.leave(group.id, leaver).await.unwrap();
    let left = sl.drain_type("participant_left");
    assert_eq!(left.len(), 1, "the leaver is told about their own departure");
    for s in [&mut sx, &mut sy, &mut sz] {
        s.drain();
    }

    let message = h.send_text(x, group.id, "hello team").await.unwrap();

    for s in [&mut sx, &mut sy, &mut sz] {
        let received = s.drain_type("message_received");
        assert_eq!(received.len(), 1, "user {} got {:?}", s.user_id, received);
        assert_eq!(received[0]["message"]["id"], message.id.to_string());
        assert_eq!(received[0]["conversation_id"], group.id.to_string());
    }
    assert!(sl.drain_type("message_received").is_empty());
}

#[tokio::test]
async fn test_multiple_sessions_of_one_user_each_get_a_copy() {
    let h = Harness::new();
    let (a, b) = (h.user().await, h.user().await);
    let direct = h.state.conversations.get_or_create_direct(a, b).await.unwrap();

    let mut phone = h.connect(b).await;
    let mut laptop = h.connect(b).await;
    h.send_text(a, direct.id, "sync").await.unwrap();

    assert_eq!(phone.drain_type("message_received").len(), 1);
    assert_eq!(laptop.drain_type("message_received").len(), 1);
}

#[tokio::test]
async fn test_offline_recipient_is_handed_to_notification_sink() {
    let h = Harness::new();
    let (a, b) = (h.user().await, h.user().await);
    let direct = h.state.conversations.get_or_create_direct(a, b).await.unwrap();
    let _sa = h.connect(a).await;

    let message = h.send_text(a, direct.id, "are you there?").await.unwrap();
    h.settle().await;

    let delivered = h.sink.delivered.lock().await;
    assert_eq!(delivered.len(), 1, "sender is online and excluded");
    let n = &delivered[0];
    assert_eq!(n.recipient_id, b);
    assert_eq!(n.event_type, "message_received");
    assert_eq!(n.message_id, Some(message.id));
    assert_eq!(n.preview.as_deref(), Some("are you there?"));
}

#[tokio::test]
async fn test_new_member_session_is_subscribed_on_join() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let newcomer = h.user().await;
    let group = h.group(admin, &[member]).await;

    let mut s = h.connect(newcomer).await;
    assert_eq!(h.state.router.presence().room_size(group.id).await, 0);

    h.state
        .conversations
        .add_member(group.id, admin, newcomer)
        .await
        .unwrap();
    assert_eq!(s.drain_type("participant_joined").len(), 1);

    h.send_text(admin, group.id, "welcome").await.unwrap();
    assert_eq!(s.drain_type("message_received").len(), 1);
}

#[tokio::test]
async fn test_removed_member_stops_receiving() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let other = h.user().await;
    let group = h.group(admin, &[member, other]).await;

    let mut s = h.connect(member).await;
    h.state
        .conversations
        .remove_member(group.id, admin, member)
        .await
        .unwrap();
    assert_eq!(s.drain_type("participant_removed").len(), 1);

    h.send_text(admin, group.id, "after removal").await.unwrap();
    assert!(s.drain_type("message_received").is_empty());
}

#[tokio::test]
async fn test_typing_is_debounced_and_skips_origin_session() {
    let h = Harness::new();
    let (a, b) = (h.user().await, h.user().await);
    let direct = h.state.conversations.get_or_create_direct(a, b).await.unwrap();

    let mut sa = h.connect(a).await;
    let mut sa2 = h.connect(a).await;
    let mut sb = h.connect(b).await;
    for s in [&mut sa, &mut sa2, &mut sb] {
        s.drain();
    }

    assert!(h.state.router.typing(&direct, a, sa.id, true).await);
    assert!(!h.state.router.typing(&direct, a, sa.id, true).await);

    assert_eq!(sb.drain_type("typing_start").len(), 1);
    assert_eq!(sa2.drain_type("typing_start").len(), 1);
    assert!(sa.drain_type("typing_start").is_empty());

    assert!(h.state.router.typing(&direct, a, sa.id, false).await);
    assert_eq!(sb.drain_type("typing_stop").len(), 1);

    h.settle().await;
    assert!(
        h.sink.delivered.lock().await.is_empty(),
        "typing is never handed off"
    );
}

#[tokio::test]
async fn test_presence_transitions_are_broadcast() {
    let h = Harness::new();
    let (a, b) = (h.user().await, h.user().await);
    h.state.conversations.get_or_create_direct(a, b).await.unwrap();

    let mut sa = h.connect(a).await;
    let sb = h.connect(b).await;

    let online = sa.drain_type("user-status-update");
    assert_eq!(online.len(), 1);
    assert_eq!(online[0]["user_id"], b.to_string());
    assert_eq!(online[0]["status"], "online");

    h.state.router.disconnect(sb.id).await;
    let offline = sa.drain_type("user-status-update");
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0]["status"], "offline");
    assert!(!h.state.router.presence().is_online(b).await);
}

#[tokio::test]
async fn test_closed_session_still_goes_offline_on_disconnect() {
    let h = Harness::new();
    let (a, b) = (h.user().await, h.user().await);
    let direct = h.state.conversations.get_or_create_direct(a, b).await.unwrap();

    let mut sa = h.connect(a).await;
    let sb = h.connect(b).await;
    assert!(h.state.router.typing(&direct, b, sb.id, true).await);
    sa.drain();

    // The receiver goes away before the session is unregistered.
    let sb_id = sb.id;
    drop(sb);
    h.send_text(a, direct.id, "hi").await.unwrap();
    assert!(!h.state.router.presence().is_online(b).await);

    h.state.router.disconnect(sb_id).await;
    let offline = sa.drain_type("user-status-update");
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0]["user_id"], b.to_string());
    assert_eq!(offline[0]["status"], "offline");

    // Typing state went with the session.
    let sb2 = h.connect(b).await;
    assert!(h.state.router.typing(&direct, b, sb2.id, true).await);
}

#[tokio::test]
async fn test_session_rooms_resync_after_registration() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let late = h.user().await;
    let group = h.group(admin, &[member]).await;

    // Room list taken before the membership change lands.
    let stale = h.rooms_of(late).await;
    h.state
        .conversations
        .add_member(group.id, admin, late)
        .await
        .unwrap();
    let mut s = h.connect_with_rooms(late, &stale).await;

    h.send_text(admin, group.id, "missed").await.unwrap();
    assert!(s.drain_type("message_received").is_empty());

    let current = h.rooms_of(late).await;
    h.state.router.sync_rooms(s.id, &current).await;
    h.send_text(admin, group.id, "caught").await.unwrap();
    assert_eq!(s.drain_type("message_received").len(), 1);
}

#[tokio::test]
async fn test_pending_add_request_is_announced_once() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let invitee = h.user().await;
    let group = h.group(admin, &[member]).await;
    let mut sa = h.connect(admin).await;

    for _ in 0..2 {
        h.state
            .conversations
            .add_member(group.id, member, invitee)
            .await
            .unwrap();
    }
    assert_eq!(sa.drain_type("join_request_received").len(), 1);
}
