// Integration tests for route matching and the dispatch loop
#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::body::Body;
    use http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use junction::{
        Flow, HandlerError, Middleware, RegistrationError, RequestContext, Router, RouterOptions,
        RouterService, error_handler_fn, handler_fn, param_fn,
    };
    use tower::ServiceExt;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, String) {
        let response = RouterService::new(router.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn reply(text: &'static str) -> Middleware {
        handler_fn(move |ctx| Box::pin(async move { ctx.respond(StatusCode::OK, text) }))
    }

    fn record(log: &Log, name: &'static str) -> Middleware {
        let log = log.clone();
        handler_fn(move |_ctx| {
            log.lock().unwrap().push(name);
            Box::pin(async { Flow::Next })
        })
    }

    fn fail(status: StatusCode, message: &'static str) -> Middleware {
        handler_fn(move |_ctx| {
            Box::pin(async move { Flow::fail(HandlerError::with_status(status, message)) })
        })
    }

    #[tokio::test]
    async fn test_dispatches_every_method() {
        let router = Router::new();
        router
            .all(
                "/foo",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let method = ctx.method().to_string();
                        ctx.respond(StatusCode::OK, method)
                    })
                }),
            )
            .unwrap();

        let methods = [
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
            Method::TRACE,
            Method::from_bytes(b"PURGE").unwrap(),
        ];
        for method in methods {
            let (status, body) = send(&router, method.clone(), "/foo").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, method.as_str());
        }
    }

    #[tokio::test]
    async fn test_method_specific_routes() {
        let router = Router::new();
        router
            .get("/item", reply("read"))
            .unwrap()
            .post("/item", reply("created"))
            .unwrap()
            .on(Method::from_bytes(b"PURGE").unwrap(), "/item", reply("purged"))
            .unwrap();

        assert_eq!(send(&router, Method::GET, "/item").await.1, "read");
        assert_eq!(send(&router, Method::POST, "/item").await.1, "created");
        assert_eq!(
            send(&router, Method::from_bytes(b"PURGE").unwrap(), "/item").await.1,
            "purged"
        );

        let (status, body) = send(&router, Method::DELETE, "/item").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Cannot DELETE /item\n");
    }

    #[tokio::test]
    async fn test_many_unmatched_routes_before_match() {
        let router = Router::new();
        for i in 0..6000 {
            router.get(format!("/thing{i}"), reply("thing")).unwrap();
        }
        router.get("/", reply("root")).unwrap();

        let (status, body) = send(&router, Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "root");

        let (status, body) = send(&router, Method::GET, "/thing5999").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "thing");
    }

    #[tokio::test]
    async fn test_many_pass_through_middleware() {
        let router = Router::new();
        for _ in 0..6000 {
            router
                .use_middleware(handler_fn(|_ctx| Box::pin(async { Flow::Next })))
                .unwrap();
        }
        router.get("/", reply("reached")).unwrap();

        assert_eq!(send(&router, Method::GET, "/").await.1, "reached");
    }

    #[tokio::test]
    async fn test_case_insensitive_by_default() {
        let router = Router::new();
        router.get("/foo/bar", reply("ok")).unwrap();

        assert_eq!(send(&router, Method::GET, "/foo/bar").await.0, StatusCode::OK);
        assert_eq!(send(&router, Method::GET, "/FOO/bar").await.0, StatusCode::OK);
        assert_eq!(send(&router, Method::GET, "/FOO/BAR").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_case_sensitive_routes() {
        let router = Router::with_options(RouterOptions {
            case_sensitive: true,
            ..RouterOptions::default()
        });
        router.get("/foo/bar", reply("ok")).unwrap();
        router.use_at("/Mount", reply("mounted")).unwrap();

        assert_eq!(send(&router, Method::GET, "/foo/bar").await.0, StatusCode::OK);
        assert_eq!(
            send(&router, Method::GET, "/FOO/bar").await.0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(send(&router, Method::GET, "/Mount/x").await.1, "mounted");
        assert_eq!(
            send(&router, Method::GET, "/mount/x").await.0,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_case_folding_keeps_param_values() {
        let router = Router::new();
        router
            .get(
                "/user/:name",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let name = ctx.param("name").unwrap_or_default().to_string();
                        ctx.respond(StatusCode::OK, name)
                    })
                }),
            )
            .unwrap();

        assert_eq!(send(&router, Method::GET, "/USER/TobI").await.1, "TobI");
    }

    #[tokio::test]
    async fn test_trailing_slash_is_optional_by_default() {
        let router = Router::new();
        router.get("/foo", reply("foo")).unwrap();

        assert_eq!(send(&router, Method::GET, "/foo").await.0, StatusCode::OK);
        assert_eq!(send(&router, Method::GET, "/foo/").await.0, StatusCode::OK);
        assert_eq!(
            send(&router, Method::GET, "/foo//").await.0,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_strict_routing() {
        let router = Router::with_options(RouterOptions {
            strict: true,
            ..RouterOptions::default()
        });
        router.get("/foo", reply("foo")).unwrap();
        router.get("/bar/", reply("bar")).unwrap();
        router.use_at("/mount", reply("mounted")).unwrap();

        assert_eq!(send(&router, Method::GET, "/foo").await.0, StatusCode::OK);
        assert_eq!(
            send(&router, Method::GET, "/foo/").await.0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(send(&router, Method::GET, "/bar/").await.0, StatusCode::OK);
        assert_eq!(
            send(&router, Method::GET, "/bar").await.0,
            StatusCode::NOT_FOUND
        );
        // Mounts ignore strict
        assert_eq!(send(&router, Method::GET, "/mount/").await.1, "mounted");
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new();
        router
            .use_middleware(Middleware::list([
                Middleware::list([record(&log, "h1"), record(&log, "h2")]),
                record(&log, "h3"),
            ]))
            .unwrap();
        router
            .get("/", [record(&log, "get1"), record(&log, "get2")])
            .unwrap();
        router.all("/", record(&log, "all")).unwrap();
        router.use_middleware(reply("done")).unwrap();

        assert_eq!(send(&router, Method::GET, "/").await.1, "done");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["h1", "h2", "h3", "all", "get1", "get2"]
        );
    }

    #[tokio::test]
    async fn test_nested_lists_register_like_flat_ones() {
        let nested_log: Log = Arc::new(Mutex::new(Vec::new()));
        let flat_log: Log = Arc::new(Mutex::new(Vec::new()));

        let nested = Router::new();
        nested
            .use_middleware(Middleware::list([
                Middleware::list([record(&nested_log, "h1"), record(&nested_log, "h2")]),
                record(&nested_log, "h3"),
            ]))
            .unwrap();
        let flat = Router::new();
        flat.use_middleware([
            record(&flat_log, "h1"),
            record(&flat_log, "h2"),
            record(&flat_log, "h3"),
        ])
        .unwrap();

        send(&nested, Method::GET, "/").await;
        send(&flat, Method::GET, "/").await;
        assert_eq!(*nested_log.lock().unwrap(), *flat_log.lock().unwrap());
        assert_eq!(nested.len(), flat.len());
    }

    #[tokio::test]
    async fn test_route_is_visible_to_its_handlers() {
        let router = Router::new();
        router
            .get(
                "/user/:id",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let path = ctx.route().map(|route| route.path()).unwrap_or_default();
                        ctx.respond(StatusCode::OK, path)
                    })
                }),
            )
            .unwrap();

        assert_eq!(send(&router, Method::GET, "/user/7").await.1, "/user/:id");
    }

    #[tokio::test]
    async fn test_route_handle_chains() {
        let router = Router::new();
        router
            .route("/thing")
            .unwrap()
            .get(reply("got"))
            .unwrap()
            .put(reply("put"))
            .unwrap();

        assert_eq!(send(&router, Method::GET, "/thing").await.1, "got");
        assert_eq!(send(&router, Method::PUT, "/thing").await.1, "put");
        assert_eq!(router.len(), 1);
    }

    #[tokio::test]
    async fn test_params_are_decoded() {
        let router = Router::new();
        router
            .get(
                "/files/:name",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let name = ctx.param("name").unwrap_or_default().to_string();
                        ctx.respond(StatusCode::OK, name)
                    })
                }),
            )
            .unwrap();

        assert_eq!(
            send(&router, Method::GET, "/files/hello%20world").await.1,
            "hello world"
        );
    }

    #[tokio::test]
    async fn test_optional_and_wildcard_params() {
        let router = Router::new();
        router
            .get(
                "/page/:num?",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let num = ctx.param("num").unwrap_or("none").to_string();
                        ctx.respond(StatusCode::OK, num)
                    })
                }),
            )
            .unwrap();
        router
            .get(
                "/static/*",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let rest = ctx.param("0").unwrap_or_default().to_string();
                        ctx.respond(StatusCode::OK, rest)
                    })
                }),
            )
            .unwrap();

        assert_eq!(send(&router, Method::GET, "/page").await.1, "none");
        assert_eq!(send(&router, Method::GET, "/page/3").await.1, "3");
        assert_eq!(
            send(&router, Method::GET, "/static/css/site.css").await.1,
            "css/site.css"
        );
    }

    #[tokio::test]
    async fn test_regex_route() {
        let router = Router::new();
        router
            .get(
                regex::Regex::new(r"^/v(?P<version>\d+)/status$").unwrap(),
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let version = ctx.param("version").unwrap_or_default().to_string();
                        ctx.respond(StatusCode::OK, version)
                    })
                }),
            )
            .unwrap();

        assert_eq!(send(&router, Method::GET, "/v2/status").await.1, "2");
        assert_eq!(
            send(&router, Method::GET, "/vx/status").await.0,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_unicode_equivalent_paths() {
        let router = Router::new();
        router.get("/caf\u{e9}", reply("composed")).unwrap();
        router.get("/nai\u{308}ve", reply("decomposed")).unwrap();

        // Decomposed request for a composed route
        assert_eq!(send(&router, Method::GET, "/cafe%CC%81").await.1, "composed");
        assert_eq!(send(&router, Method::GET, "/caf%C3%A9").await.1, "composed");
        // Composed request for a decomposed route
        assert_eq!(send(&router, Method::GET, "/na%C3%AFve").await.1, "decomposed");
    }

    #[tokio::test]
    async fn test_error_skips_regular_handlers() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new();
        router
            .use_middleware(fail(StatusCode::BAD_REQUEST, "bad input"))
            .unwrap();
        router.use_middleware(record(&log, "skipped")).unwrap();
        router.get("/", record(&log, "route")).unwrap();

        let (status, body) = send(&router, Method::GET, "/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "bad input\n");
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_handler_resolves_error() {
        let router = Router::new();
        router
            .use_middleware(fail(StatusCode::BAD_REQUEST, "bad input"))
            .unwrap();
        router
            .use_middleware(error_handler_fn(|err, ctx| {
                Box::pin(async move {
                    ctx.set_header("x-error", err.to_string());
                    Flow::Next
                })
            }))
            .unwrap();
        router.get("/", reply("recovered")).unwrap();

        let (status, body) = send(&router, Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "recovered");
    }

    #[tokio::test]
    async fn test_error_handlers_are_skipped_without_error() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new();
        {
            let log = log.clone();
            router
                .use_middleware(error_handler_fn(move |err, _ctx| {
                    log.lock().unwrap().push("error handler");
                    Box::pin(async move { Flow::Fail(err) })
                }))
                .unwrap();
        }
        router.get("/", reply("fine")).unwrap();

        assert_eq!(send(&router, Method::GET, "/").await.1, "fine");
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_handler_inside_route() {
        let router = Router::new();
        router
            .get(
                "/err",
                [
                    fail(StatusCode::CONFLICT, "conflict"),
                    reply("never"),
                    error_handler_fn(|err, ctx| {
                        Box::pin(async move {
                            ctx.respond(StatusCode::ACCEPTED, format!("caught {}", err.status()))
                        })
                    }),
                ],
            )
            .unwrap();

        let (status, body) = send(&router, Method::GET, "/err").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, "caught 409 Conflict");
    }

    #[tokio::test]
    async fn test_unhandled_error_hides_details() {
        let router = Router::new();
        router
            .get(
                "/",
                handler_fn(|_ctx| {
                    Box::pin(async { Flow::fail(eyre::eyre!("database password is hunter2")) })
                }),
            )
            .unwrap();

        let (status, body) = send(&router, Method::GET, "/").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error\n");
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_error() {
        let router = Router::new();
        router
            .get(
                "/panic",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        if ctx.path() == "/panic" {
                            panic!("handler exploded");
                        }
                        Flow::Next
                    })
                }),
            )
            .unwrap();
        router
            .use_middleware(error_handler_fn(|err, ctx| {
                Box::pin(async move {
                    let text = err.to_string();
                    ctx.respond(StatusCode::SERVICE_UNAVAILABLE, text)
                })
            }))
            .unwrap();

        let (status, body) = send(&router, Method::GET, "/panic").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Handler panicked: handler exploded");
    }

    #[tokio::test]
    async fn test_skip_route() {
        let router = Router::new();
        router
            .get(
                "/foo",
                [
                    handler_fn(|ctx| {
                        Box::pin(async move {
                            if ctx.headers().contains_key("x-skip") {
                                Flow::SkipRoute
                            } else {
                                Flow::Next
                            }
                        })
                    }),
                    reply("route"),
                ],
            )
            .unwrap();
        router.use_at("/foo", reply("after route")).unwrap();

        assert_eq!(send(&router, Method::GET, "/foo").await.1, "route");

        let response = RouterService::new(router.clone())
            .oneshot(
                Request::builder()
                    .uri("/foo")
                    .header("x-skip", "1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"after route");
    }

    #[tokio::test]
    async fn test_skip_router() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let inner = Router::new();
        inner
            .use_middleware(handler_fn(|_ctx| Box::pin(async { Flow::SkipRouter })))
            .unwrap();
        inner.use_middleware(record(&log, "inner")).unwrap();
        inner.get("/", reply("inner route")).unwrap();

        let outer = Router::new();
        outer.use_middleware(&inner).unwrap();
        outer.get("/", reply("outer route")).unwrap();

        assert_eq!(send(&outer, Method::GET, "/").await.1, "outer route");
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_router_from_route() {
        let outer = Router::new();
        let inner = Router::new();
        inner
            .get(
                "/x",
                [
                    handler_fn(|_ctx| Box::pin(async { Flow::SkipRouter })),
                    reply("never"),
                ],
            )
            .unwrap();
        inner.use_middleware(reply("never either")).unwrap();
        outer.use_at("/in", &inner).unwrap();
        outer.use_middleware(reply("outer")).unwrap();

        assert_eq!(send(&outer, Method::GET, "/in/x").await.1, "outer");
    }

    #[tokio::test]
    async fn test_param_callbacks_run_once_per_value() {
        #[derive(Clone)]
        struct User(String);

        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new();
        {
            let calls = calls.clone();
            router.param(
                "id",
                param_fn(move |ctx, value| {
                    let calls = calls.clone();
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ctx.extensions_mut().insert(User(value.to_uppercase()));
                        Flow::Next
                    })
                }),
            );
        }
        router
            .use_at("/user/:id", handler_fn(|_ctx| Box::pin(async { Flow::Next })))
            .unwrap();
        router
            .get(
                "/user/:id",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let user = ctx
                            .extensions()
                            .get::<User>()
                            .map(|user| user.0.clone())
                            .unwrap_or_default();
                        ctx.respond(StatusCode::OK, user)
                    })
                }),
            )
            .unwrap();

        assert_eq!(send(&router, Method::GET, "/user/tj").await.1, "TJ");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(send(&router, Method::GET, "/user/bob").await.1, "BOB");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_param_callback_failure_skips_layer() {
        let router = Router::new();
        router.param(
            "id",
            param_fn(|_ctx, value| {
                let missing = value == "0";
                Box::pin(async move {
                    if missing {
                        Flow::fail(HandlerError::with_status(StatusCode::NOT_FOUND, "no such user"))
                    } else {
                        Flow::Next
                    }
                })
            }),
        );
        router.get("/user/:id", reply("user")).unwrap();

        assert_eq!(send(&router, Method::GET, "/user/1").await.1, "user");
        let (status, body) = send(&router, Method::GET, "/user/0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "no such user\n");
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let router = Router::new();
        router.use_at("/api", reply("short prefix")).unwrap();
        router.use_at("/api/v1", reply("long prefix")).unwrap();

        assert_eq!(send(&router, Method::GET, "/api/v1/users").await.1, "short prefix");
    }

    #[tokio::test]
    async fn test_late_registration_is_served() {
        let router = Router::new();
        assert_eq!(
            send(&router, Method::GET, "/late").await.0,
            StatusCode::NOT_FOUND
        );

        router.get("/late", reply("now here")).unwrap();
        assert_eq!(send(&router, Method::GET, "/late").await.1, "now here");
    }

    #[tokio::test]
    async fn test_blank_url_matches_nothing() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new();
        router.use_middleware(record(&log, "saw")).unwrap();

        let mut ctx = RequestContext::new(Method::GET, "");
        let outcome = router.handle(&mut ctx).await;
        assert!(!outcome.is_halted());
        assert!(outcome.error().is_none());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_finishes_without_error() {
        let router = Router::new();
        router.get("/", reply("root")).unwrap();

        let mut ctx = RequestContext::new(Method::GET, "/nonexistent");
        let outcome = router.handle(&mut ctx).await;
        assert!(!outcome.is_halted());
        assert!(outcome.into_error().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_dispatches_are_isolated() {
        let router = Router::new();
        router
            .get(
                "/echo/:value",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        tokio::task::yield_now().await;
                        let value = ctx.param("value").unwrap_or_default().to_string();
                        ctx.respond(StatusCode::OK, value)
                    })
                }),
            )
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..64 {
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                let (_, body) = send(&router, Method::GET, &format!("/echo/{i}")).await;
                (i, body)
            }));
        }
        for task in tasks {
            let (i, body) = task.await.unwrap();
            assert_eq!(body, i.to_string());
        }
    }

    #[test]
    fn test_registration_errors() {
        let router = Router::new();
        assert!(matches!(
            router.use_middleware(Middleware::List(vec![])),
            Err(RegistrationError::MissingHandler { .. })
        ));
        assert!(matches!(
            router.get("/x", Middleware::list([Middleware::List(vec![])])),
            Err(RegistrationError::MissingHandler { .. })
        ));
        assert!(matches!(
            router.get("/user/:id(", reply("x")),
            Err(RegistrationError::InvalidPattern { .. })
        ));
        assert!(router.is_empty());
    }

    #[test]
    fn test_cyclic_mounts_are_rejected() {
        let a = Router::new();
        let b = Router::new();
        let c = Router::new();
        a.use_at("/b", &b).unwrap();
        b.use_at("/c", &c).unwrap();

        assert!(matches!(
            c.use_at("/a", &a),
            Err(RegistrationError::CyclicMount { .. })
        ));
        assert!(matches!(
            a.use_middleware(&a),
            Err(RegistrationError::CyclicMount { .. })
        ));
        assert!(matches!(
            c.get("/loop", &b),
            Err(RegistrationError::CyclicMount { .. })
        ));
        // Mounting the same router twice is not a cycle
        assert!(a.use_at("/again", &c).is_ok());
    }
}
