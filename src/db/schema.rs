pub const SCHEMA: &str = "
    -- Guild configuration, one row per guild
    CREATE TABLE IF NOT EXISTS guilds (
        guild_id INTEGER PRIMARY KEY,
        prefix TEXT,
        log_channel INTEGER,
        case_channel INTEGER,
        modmail_channel INTEGER,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    -- Rank membership, a role or user id per row
    CREATE TABLE IF NOT EXISTS guild_ranks (
        guild_id INTEGER NOT NULL,
        rank TEXT NOT NULL,
        target_id INTEGER NOT NULL,
        PRIMARY KEY (guild_id, rank, target_id)
    );

    CREATE TABLE IF NOT EXISTS guild_commands (
        guild_id INTEGER NOT NULL,
        command TEXT NOT NULL,
        enabled BOOLEAN,
        data TEXT,
        PRIMARY KEY (guild_id, command)
    );

    CREATE TABLE IF NOT EXISTS guild_usage_limits (
        guild_id INTEGER NOT NULL,
        command TEXT NOT NULL,
        global_cooldown_ms INTEGER,
        local_cooldown_ms INTEGER,
        enabled BOOLEAN,
        PRIMARY KEY (guild_id, command)
    );

    CREATE TABLE IF NOT EXISTS guild_megalog (
        guild_id INTEGER NOT NULL,
        function TEXT NOT NULL,
        channel_id INTEGER NOT NULL,
        PRIMARY KEY (guild_id, function)
    );

    CREATE TABLE IF NOT EXISTS guild_megalog_ignore (
        guild_id INTEGER NOT NULL,
        channel_id INTEGER NOT NULL,
        PRIMARY KEY (guild_id, channel_id)
    );

    -- In-flight multi-turn command state
    CREATE TABLE IF NOT EXISTS command_caches (
        channel_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        guild_id INTEGER,
        command TEXT NOT NULL,
        perm_level INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        payload TEXT NOT NULL DEFAULT '{}',
        PRIMARY KEY (channel_id, user_id)
    );
    CREATE INDEX IF NOT EXISTS idx_command_caches_expires ON command_caches (expires_at);
    CREATE INDEX IF NOT EXISTS idx_command_caches_guild ON command_caches (guild_id);

    -- Last-used timestamps per (user, scope, command)
    CREATE TABLE IF NOT EXISTS user_usage (
        user_id INTEGER NOT NULL,
        scope TEXT NOT NULL,
        command TEXT NOT NULL,
        last_used INTEGER NOT NULL,
        PRIMARY KEY (user_id, scope, command)
    );
    CREATE INDEX IF NOT EXISTS idx_user_usage_last_used ON user_usage (last_used);

    CREATE TABLE IF NOT EXISTS cases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        target_id INTEGER NOT NULL,
        moderator_id INTEGER NOT NULL,
        reason TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_cases_guild ON cases (guild_id);

    CREATE TABLE IF NOT EXISTS log_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_log_entries_guild ON log_entries (guild_id);

    CREATE TABLE IF NOT EXISTS timed_actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        execute_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_timed_actions_guild ON timed_actions (guild_id);

    CREATE TABLE IF NOT EXISTS webhook_subscriptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id INTEGER NOT NULL,
        channel_id INTEGER NOT NULL,
        feed_id TEXT NOT NULL,
        message TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_webhook_subscriptions_guild ON webhook_subscriptions (guild_id);
";
